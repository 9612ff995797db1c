//! On-disk region store, one compressed container file per region coordinate.
//!
//! A region file starts with a one-byte compression id followed by the compressed
//! root compound. Writing always uses zlib, reading accepts raw, gzip and zlib so
//! files can be recompressed or inspected offline.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use glam::IVec2;

use super::tag::{self, TagCompound, TagError};


const COMPRESSION_RAW: u8 = 0;
const COMPRESSION_GZIP: u8 = 1;
const COMPRESSION_ZLIB: u8 = 2;


/// A handle to the directory storing every region file of a world.
pub struct RegionStore {
    /// Path of the directory containing the region files.
    dir: PathBuf,
}

impl RegionStore {

    /// Create a new store writing region files under the given directory. The
    /// directory is created lazily on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the region file for the given region position.
    pub fn region_path(&self, pos: IVec2) -> PathBuf {
        self.dir.join(format!("r.{}.{}.dat", pos.x, pos.y))
    }

    /// Return true if backing storage exists for the given region position.
    pub fn exists(&self, pos: IVec2) -> bool {
        self.region_path(pos).is_file()
    }

    /// Read the root compound of the given region, returning none if the region has
    /// no backing storage, which is not an error.
    pub fn read(&self, pos: IVec2) -> Result<Option<TagCompound>, StoreError> {

        let file = match File::open(self.region_path(pos)) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };

        let mut reader = BufReader::new(file);

        let mut compression_id = [0u8; 1];
        reader.read_exact(&mut compression_id)?;

        let root = match compression_id[0] {
            COMPRESSION_RAW => tag::from_reader(reader)?,
            COMPRESSION_GZIP => tag::from_reader(GzDecoder::new(reader))?,
            COMPRESSION_ZLIB => tag::from_reader(ZlibDecoder::new(reader))?,
            id => return Err(StoreError::IllegalCompression(id)),
        };

        Ok(Some(root))

    }

    /// Write the root compound of the given region, replacing any previous content.
    pub fn write(&self, pos: IVec2, root: &TagCompound) -> Result<(), StoreError> {

        ensure_dir(&self.dir)?;

        let file = File::create(self.region_path(pos))?;
        let mut writer = BufWriter::new(file);

        writer.write_all(&[COMPRESSION_ZLIB])?;

        let mut encoder = ZlibEncoder::new(writer, Compression::default());
        tag::to_writer(&mut encoder, root)?;
        encoder.finish()?.flush()?;

        Ok(())

    }

}

/// Internal function to create the store directory, rejecting a non-directory path.
fn ensure_dir(dir: &Path) -> io::Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        fs::create_dir_all(dir)
    }
}


/// Error type used together with every call on region store methods.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("tag: {0}")]
    Tag(#[from] TagError),
    #[error("the compression id {0} in the region file header is illegal")]
    IllegalCompression(u8),
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::serde::tag::Tag;

    #[test]
    fn missing_region() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegionStore::new(dir.path().join("region"));
        assert!(!store.exists(IVec2::new(0, 0)));
        assert!(store.read(IVec2::new(0, 0)).unwrap().is_none());
    }

    #[test]
    fn write_and_read_back() {

        let dir = tempfile::tempdir().unwrap();
        let store = RegionStore::new(dir.path().join("region"));

        let mut root = TagCompound::new();
        root.insert("generated", Tag::Byte(0));
        root.insert("payload", Tag::ByteArray(vec![1, 2, 3]));

        let pos = IVec2::new(-3, 7);
        store.write(pos, &root).unwrap();

        assert!(store.exists(pos));
        assert!(!store.exists(IVec2::new(7, -3)));

        let read = store.read(pos).unwrap().unwrap();
        assert_eq!(read, root);

    }

    #[test]
    fn corrupt_compression_id() {

        let dir = tempfile::tempdir().unwrap();
        let store = RegionStore::new(dir.path().to_path_buf());
        let pos = IVec2::new(0, 0);

        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(store.region_path(pos), [9u8, 0, 0]).unwrap();

        assert!(matches!(store.read(pos), Err(StoreError::IllegalCompression(9))));

    }

}
