use std::future::Future;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::fetcher::ChunkSink;

/// Somewhere to persist a named blob of bytes.
pub trait BlobStore {
    fn put(&mut self, name: &str, bytes: Vec<u8>) -> impl Future<Output = io::Result<()>>;
}

/// Stores blobs as files in a single directory.
#[derive(Debug)]
pub struct DirStore {
    directory: PathBuf,
}

impl DirStore {
    /// Creates `directory` and any missing parents.
    pub async fn create(directory: impl Into<PathBuf>) -> io::Result<Self> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory).await?;

        Ok(Self { directory })
    }
}

impl BlobStore for DirStore {
    async fn put(&mut self, name: &str, bytes: Vec<u8>) -> io::Result<()> {
        let path = self.directory.join(name);
        tokio::fs::write(&path, bytes).await?;

        tracing::info!("Data has been written to {}", path.display());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to encode chunk: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to store chunk: {0}")]
    Store(#[from] io::Error),
}

/// Writes each chunk as `{prefix}_{from}_{to}.json`, a JSON array indented
/// with four spaces.
pub struct JsonChunkSink<S> {
    store: S,
    prefix: String,
}

impl<S> JsonChunkSink<S> {
    pub fn new(store: S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn file_name(&self, chunk_start: u64, chunk_end: u64) -> String {
        format!("{}_{chunk_start}_{chunk_end}.json", self.prefix)
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<T, S> ChunkSink<T> for JsonChunkSink<S>
where
    T: Serialize,
    S: BlobStore,
{
    type Error = SinkError;

    async fn emit(&mut self, chunk_start: u64, chunk_end: u64, items: Vec<T>) -> Result<(), SinkError> {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        items.serialize(&mut ser)?;

        let name = self.file_name(chunk_start, chunk_end);
        self.store.put(&name, buf).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MemoryStore {
        blobs: BTreeMap<String, Vec<u8>>,
    }

    impl BlobStore for MemoryStore {
        async fn put(&mut self, name: &str, bytes: Vec<u8>) -> io::Result<()> {
            self.blobs.insert(name.to_string(), bytes);
            Ok(())
        }
    }

    struct ReadOnly;

    impl BlobStore for ReadOnly {
        async fn put(&mut self, _name: &str, _bytes: Vec<u8>) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    struct Blocks;

    impl fetcher::UnitSource for Blocks {
        type Item = Value;
        type Error = String;

        async fn fetch_unit(&self, unit: u64) -> Result<Option<Vec<Value>>, String> {
            Ok(Some(vec![json!({"blockNumber": format!("{unit:#x}")})]))
        }
    }

    #[tokio::test]
    async fn writes_indented_array() {
        let mut sink = JsonChunkSink::new(MemoryStore::default(), "tx");

        sink.emit(5, 6, vec![json!({"hash": "0xaa"}), json!(1)]).await.unwrap();

        let store = sink.into_inner();
        let text = String::from_utf8(store.blobs["tx_5_6.json"].clone()).unwrap();
        assert_eq!(text, "[\n    {\n        \"hash\": \"0xaa\"\n    },\n    1\n]");
    }

    #[tokio::test]
    async fn empty_chunk_is_empty_array() {
        let mut sink = JsonChunkSink::new(MemoryStore::default(), "blk");

        sink.emit(1, 1, Vec::<Value>::new()).await.unwrap();

        assert_eq!(sink.into_inner().blobs["blk_1_1.json"], b"[]".to_vec());
    }

    #[tokio::test]
    async fn store_failure_surfaces() {
        let mut sink = JsonChunkSink::new(ReadOnly, "blk");

        let err = sink.emit(1, 2, vec![json!(null)]).await.unwrap_err();

        assert!(matches!(err, SinkError::Store(e) if e.kind() == io::ErrorKind::PermissionDenied));
    }

    #[tokio::test]
    async fn dir_store_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("data");

        let store = DirStore::create(&dir).await.unwrap();
        let mut sink = JsonChunkSink::new(store, "blk");
        sink.emit(100, 104, vec![json!({"hash": "0x01"})]).await.unwrap();

        let written = std::fs::read_to_string(dir.join("blk_100_104.json")).unwrap();
        let parsed: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, json!([{"hash": "0x01"}]));
    }

    #[tokio::test]
    async fn run_writes_one_file_per_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::create(tmp.path()).await.unwrap();
        let mut sink = JsonChunkSink::new(store, "blk");

        let stats = fetcher::run(100, 109, 5, &Blocks, &mut sink).await.unwrap();

        let mut names = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["blk_100_104.json", "blk_105_109.json"]);

        let second: Value =
            serde_json::from_str(&std::fs::read_to_string(tmp.path().join("blk_105_109.json")).unwrap()).unwrap();
        assert_eq!(second.as_array().map(Vec::len), Some(5));
        assert_eq!(second[0], json!({"blockNumber": "0x69"}));
        assert_eq!(stats.total_items, 10);
    }
}
