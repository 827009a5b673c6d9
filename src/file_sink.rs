use crate::Error;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

/// Appends payloads to a file, one JSON document per line.
#[derive(Debug)]
pub(crate) struct FileSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileSink {
    pub(crate) fn new(path: impl AsRef<Path>) -> Self {
        FileSink {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    /// Append `payload` and a newline. The file is opened on first use.
    pub(crate) fn write(&self, payload: &[u8]) -> Result<(), Error> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if file.is_none() {
            *file = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .map_err(Error::WriteToFile)?,
            );
        }
        let Some(file) = file.as_mut() else {
            return Ok(());
        };
        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(payload);
        line.push(b'\n');
        file.write_all(&line).map_err(Error::WriteToFile)?;
        file.flush().map_err(Error::WriteToFile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn appends_one_line_per_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        let sink = FileSink::new(&path);
        sink.write(b"{\"a\":1}").unwrap();
        sink.write(b"{\"b\":2}").unwrap();
        assert_eq!(
            "{\"a\":1}\n{\"b\":2}\n",
            std::fs::read_to_string(&path).unwrap()
        );
    }

    #[test]
    fn concurrent_writes_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        let sink = Arc::new(FileSink::new(&path));
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let sink = sink.clone();
                thread::spawn(move || {
                    let line = format!("{{\"worker\":\"{}\"}}", i.to_string().repeat(1000));
                    sink.write(line.as_bytes()).unwrap();
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(8, content.lines().count());
        for line in content.lines() {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        assert!(matches!(sink.write(b"{}"), Err(Error::WriteToFile(_))));
    }
}
