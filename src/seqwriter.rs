//! Order-restoring writer for per-game artifacts.
//!
//! Games finish out of order across workers, but transcript files must be
//! ordered by game index. Producers hand `(index, payload)` pairs to
//! [`SeqWriter::push`]; payloads are buffered until the gap before them
//! closes, then flushed to the sink in index order. Whatever is still
//! buffered when the writer is dropped is flushed as-is, so games trailing a
//! hole (an aborted or skipped index) are not withheld.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};

pub struct SeqWriter {
    inner: Mutex<Inner>,
}

struct Inner {
    out: File,
    /// Pending payloads sorted by index.
    buf: Vec<(usize, String)>,
    /// Next index expected on disk.
    next: usize,
}

impl SeqWriter {
    /// Open `path` for appending.
    pub fn open(path: &Path) -> Result<SeqWriter> {
        let out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        Ok(SeqWriter {
            inner: Mutex::new(Inner {
                out,
                buf: Vec::new(),
                next: 0,
            }),
        })
    }

    /// Queue `payload` as record `idx`; flushes every record whose
    /// predecessors have all arrived. Each index must be pushed at most once.
    pub fn push(&self, idx: usize, payload: String) {
        let mut inner = self.inner.lock().expect("poisoned");

        let at = inner.buf.partition_point(|(i, _)| *i < idx);
        inner.buf.insert(at, (idx, payload));

        // longest prefix buf[0..n] with buf[k].idx == next + k
        let mut n = 0;
        while n < inner.buf.len() && inner.buf[n].0 == inner.next + n {
            n += 1;
        }
        if n > 0 {
            inner.write_prefix(n);
        }
    }
}

impl Inner {
    fn write_prefix(&mut self, n: usize) {
        for (_, payload) in self.buf.drain(..n) {
            self.out
                .write_all(payload.as_bytes())
                .expect("transcript write failed");
        }
        self.out.flush().expect("transcript flush failed");
        self.next += n;
    }
}

impl Drop for SeqWriter {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().expect("poisoned");
        let n = inner.buf.len();
        if n > 0 {
            inner.write_prefix(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn out_of_order_pushes_land_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let writer = SeqWriter::open(&path).unwrap();

        writer.push(2, "two\n".into());
        writer.push(0, "zero\n".into());
        // 1 still missing: only 0 may be on disk
        assert_eq!(fs::read_to_string(&path).unwrap(), "zero\n");
        writer.push(1, "one\n".into());
        assert_eq!(fs::read_to_string(&path).unwrap(), "zero\none\ntwo\n");
        writer.push(3, "three\n".into());
        drop(writer);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "zero\none\ntwo\nthree\n"
        );
    }

    #[test]
    fn drop_flushes_non_contiguous_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let writer = SeqWriter::open(&path).unwrap();

        writer.push(0, "a".into());
        writer.push(2, "c".into());
        writer.push(5, "f".into());
        drop(writer);
        // 1, 3, 4 never arrived; remaining records still land, in index order
        assert_eq!(fs::read_to_string(&path).unwrap(), "acf");
    }

    #[test]
    fn concurrent_producers_keep_disk_order() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let writer = Arc::new(SeqWriter::open(&path).unwrap());

        let mut handles = Vec::new();
        for t in 0..4 {
            let writer = Arc::clone(&writer);
            handles.push(std::thread::spawn(move || {
                for i in (t..64).step_by(4) {
                    writer.push(i, format!("{i}\n"));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        drop(writer);

        let content = fs::read_to_string(&path).unwrap();
        let got: Vec<usize> = content.lines().map(|l| l.parse().unwrap()).collect();
        assert_eq!(got, (0..64).collect::<Vec<_>>());
    }
}
