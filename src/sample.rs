//! Training-sample sink shared by all workers.
//!
//! Each recorded move yields one `(position, move, result)` record. Records
//! are written in per-game batches under one lock so concurrent workers never
//! interleave. Three encodings: human-readable CSV, a packed binary layout,
//! and the same binary layout behind a streaming gzip encoder; the latter
//! must be finalized through [`SampleSink::finish`] before the process exits
//! or the tail of the stream is lost.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::options::{SampleFormat, SampleParams};
use crate::position::{Move, OpeningFormat, Position};

/// One recorded decision: the position the engine saw, the move it chose and
/// the eventual game result (0 = loss, 1 = draw, 2 = win) from the viewpoint
/// of the side to move in `pos`.
pub struct Sample {
    pub pos: Position,
    pub mv: Move,
    pub result: u8,
}

enum Sink {
    Csv(File),
    Bin(File),
    BinGz(GzEncoder<File>),
}

pub struct SampleSink {
    sink: Mutex<Sink>,
}

impl SampleSink {
    pub fn open(params: &SampleParams) -> Result<SampleSink> {
        let Some(path) = params.file.as_deref() else {
            bail!("sample output requires a file name");
        };
        let open = |truncate: bool| {
            let mut opts = OpenOptions::new();
            opts.create(true).write(true);
            if truncate {
                opts.truncate(true);
            } else {
                opts.append(true);
            }
            opts.open(path)
                .with_context(|| format!("cannot open {}", path.display()))
        };
        let sink = match params.format {
            SampleFormat::Csv => Sink::Csv(open(false)?),
            SampleFormat::Bin => Sink::Bin(open(false)?),
            // a fresh gzip stream cannot append to an old one
            SampleFormat::BinGz => Sink::BinGz(GzEncoder::new(open(true)?, Compression::default())),
        };
        Ok(SampleSink {
            sink: Mutex::new(sink),
        })
    }

    /// Append one game's samples as a single uninterrupted batch.
    pub fn write_batch(&self, samples: &[Sample]) -> Result<()> {
        let mut sink = self.sink.lock().expect("poisoned");
        match &mut *sink {
            Sink::Csv(file) => {
                for sample in samples {
                    let pos = sample.pos.to_opening_str(OpeningFormat::Pos);
                    let mv = sample.pos.move_to_opening_str(sample.mv, OpeningFormat::Pos);
                    writeln!(file, "{pos},{mv},{}", sample.result).context("sample write")?;
                }
            }
            Sink::Bin(file) => {
                for sample in samples {
                    write_binary(file, sample).context("sample write")?;
                }
            }
            Sink::BinGz(encoder) => {
                for sample in samples {
                    write_binary(encoder, sample).context("sample write")?;
                }
            }
        }
        Ok(())
    }

    /// Flush buffered data and, for the compressed form, write the gzip
    /// trailer. Must be called once after all workers have joined.
    pub fn finish(self) -> Result<()> {
        match self.sink.into_inner().expect("poisoned") {
            Sink::Csv(mut file) | Sink::Bin(mut file) => file.flush().context("sample flush")?,
            Sink::BinGz(encoder) => {
                let mut file = encoder.finish().context("finalizing sample stream")?;
                file.flush().context("sample flush")?;
            }
        }
        Ok(())
    }
}

/// Packed record: a 4-byte little-endian header of
/// `boardsize:5 | ply:9 | result:2` then `move:16`, followed by the `ply`
/// position cells as 16-bit values.
fn write_binary(out: &mut dyn Write, sample: &Sample) -> std::io::Result<()> {
    let ply = sample.pos.move_count() as u16;
    debug_assert!(ply < 512);
    let head = (sample.pos.size() as u16 & 0x1F)
        | ((ply & 0x1FF) << 5)
        | ((sample.result as u16 & 0x3) << 14);
    out.write_all(&head.to_le_bytes())?;
    out.write_all(&sample.mv.raw().to_le_bytes())?;
    for mv in sample.pos.history() {
        out.write_all(&mv.pos().to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Color;
    use std::io::Read;
    use std::path::Path;

    fn sample_game() -> Vec<Sample> {
        let mut pos = Position::new(15);
        pos.play(Move::new(7, 7, Color::Black));
        pos.play(Move::new(8, 8, Color::White));
        let mv = Move::new(9, 9, Color::Black);
        vec![Sample {
            pos,
            mv,
            result: 2,
        }]
    }

    fn params(format: SampleFormat, path: &Path) -> SampleParams {
        SampleParams {
            file: Some(path.to_path_buf()),
            freq: 1.0,
            format,
        }
    }

    #[test]
    fn csv_records_one_line_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.csv");
        let sink = SampleSink::open(&params(SampleFormat::Csv, &path)).unwrap();
        sink.write_batch(&sample_game()).unwrap();
        sink.finish().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "h8i9,j10,2\n");
    }

    #[test]
    fn binary_layout_is_bit_packed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let sink = SampleSink::open(&params(SampleFormat::Bin, &path)).unwrap();
        sink.write_batch(&sample_game()).unwrap();
        sink.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // header + move + 2 position cells
        assert_eq!(bytes.len(), 4 + 2 * 2);
        let head = u16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!(head & 0x1F, 15); // board size
        assert_eq!((head >> 5) & 0x1FF, 2); // ply
        assert_eq!(head >> 14, 2); // result
        let mv = u16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(mv, Move::new(9, 9, Color::Black).raw());
        let first = u16::from_le_bytes([bytes[4], bytes[5]]);
        assert_eq!(first, Move::new(7, 7, Color::Black).pos());
    }

    #[test]
    fn gzip_stream_is_finalized_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin.gz");
        let sink = SampleSink::open(&params(SampleFormat::BinGz, &path)).unwrap();
        sink.write_batch(&sample_game()).unwrap();
        sink.finish().unwrap();

        let mut decoder = flate2::read::GzDecoder::new(File::open(&path).unwrap());
        let mut bytes = Vec::new();
        decoder.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 8);
        let head = u16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!(head & 0x1F, 15);
    }
}
