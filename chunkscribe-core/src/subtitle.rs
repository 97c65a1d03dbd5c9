//! Merges per-chunk transcripts into one SRT document.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::pipeline::Chunk;

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleLine {
    /// 1-based, contiguous across the document.
    pub index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

/// Orders chunks by offset and shifts every segment onto the source timeline.
///
/// Chunks sharing an offset keep their input order; segments keep their order
/// inside a chunk. Chunks without a transcript and segments whose text is
/// blank contribute nothing.
pub fn assemble(chunks: &[Chunk]) -> Vec<SubtitleLine> {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by(|lhs, rhs| lhs.offset_seconds.total_cmp(&rhs.offset_seconds));

    ordered
        .into_iter()
        .filter_map(|chunk| chunk.result.as_ref().map(|result| (chunk.offset_seconds, result)))
        .flat_map(|(offset, result)| {
            result
                .segments
                .iter()
                .filter(|segment| !segment.text.trim().is_empty())
                .map(move |segment| {
                    (
                        offset + segment.start_seconds,
                        offset + segment.end_seconds,
                        segment.text.clone(),
                    )
                })
        })
        .enumerate()
        .map(|(position, (start_seconds, end_seconds, text))| SubtitleLine {
            index: position + 1,
            start_seconds,
            end_seconds,
            text,
        })
        .collect()
}

pub fn to_srt(lines: &[SubtitleLine]) -> String {
    let mut output = String::new();
    for line in lines {
        let _ = write!(
            output,
            "{}\n{} --> {}\n{}\n\n",
            line.index,
            format_timestamp(line.start_seconds),
            format_timestamp(line.end_seconds),
            line.text.trim()
        );
    }
    output
}

/// `HH:MM:SS,mmm`; negative input clamps to zero.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

pub fn subtitle_path_for(source: &Path) -> PathBuf {
    source.with_extension("srt")
}

pub async fn write_srt(path: &Path, lines: &[SubtitleLine]) -> std::io::Result<()> {
    fs::write(path, to_srt(lines)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{TranscriptResult, TranscriptSegment};

    fn chunk(offset: f64, texts: &[(f64, f64, &str)]) -> Chunk {
        let mut chunk = Chunk::new(offset, format!("/w/{offset}.mp3"));
        chunk.result = Some(TranscriptResult::new(
            texts
                .iter()
                .map(|(start, end, text)| TranscriptSegment {
                    start_seconds: *start,
                    end_seconds: *end,
                    text: text.to_string(),
                })
                .collect(),
        ));
        chunk
    }

    #[test]
    fn out_of_order_chunks_are_sorted_and_reindexed() {
        let chunks = vec![
            chunk(120.0, &[(1.0, 2.0, "third")]),
            chunk(0.0, &[(1.0, 2.0, "first"), (3.0, 4.0, "second")]),
            Chunk::new(60.0, "/w/pending.mp3"),
            chunk(180.0, &[]),
        ];
        let lines = assemble(&chunks);
        let summary: Vec<_> = lines
            .iter()
            .map(|line| (line.index, line.start_seconds, line.text.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![(1, 1.0, "first"), (2, 3.0, "second"), (3, 121.0, "third")]
        );
        assert_eq!(assemble(&chunks), lines);
    }

    #[test]
    fn blank_segments_are_skipped_before_numbering() {
        let chunks = vec![
            chunk(0.0, &[(0.0, 1.0, "first"), (1.0, 2.0, "   "), (2.0, 3.0, "")]),
            chunk(60.0, &[(0.5, 1.5, "second")]),
        ];
        let lines = assemble(&chunks);
        let indexes: Vec<usize> = lines.iter().map(|line| line.index).collect();
        assert_eq!(indexes, vec![1, 2]);
        assert_eq!(lines[1].text, "second");
        assert!(!to_srt(&lines).contains("\n\n\n"));
    }

    #[test]
    fn srt_serialization() {
        let lines = assemble(&[chunk(3661.0, &[(0.5, 1.25, " hi ")])]);
        assert_eq!(to_srt(&lines), "1\n01:01:01,500 --> 01:01:02,250\nhi\n\n");
        assert_eq!(format_timestamp(-3.0), "00:00:00,000");
    }

    #[test]
    fn subtitle_sits_next_to_source() {
        assert_eq!(
            subtitle_path_for(Path::new("/media/talk.final.mp4")),
            PathBuf::from("/media/talk.final.srt")
        );
    }
}
