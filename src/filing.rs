//! # Serialization interface
//!
//! Interface to serialize and to deserialize the alignment artifacts
//! and the data repository where they are saved.

use std::{
    fmt::Debug,
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum FilingError {
    #[error("filing error")]
    IO(#[from] std::io::Error),
    #[error("can't create file {1:?}")]
    Create(#[source] std::io::Error, PathBuf),
    #[error("can't open file {1:?}")]
    Open(#[source] std::io::Error, PathBuf),
    #[error("decoder error")]
    Decoder(#[from] bincode::error::DecodeError),
    #[error("encoder error")]
    Encoder(#[from] bincode::error::EncodeError),
    #[error("{0:?} already exists")]
    Exists(PathBuf),
}

pub type Result<T> = std::result::Result<T, FilingError>;

/// Encoding and decoding
pub trait Codec
where
    Self: Sized + serde::ser::Serialize + for<'de> serde::de::Deserialize<'de>,
{
    /// Decodes object from [std::io::Read]
    #[inline]
    fn decode<R>(reader: &mut R) -> Result<Self>
    where
        R: Read,
    {
        Ok(bincode::serde::decode_from_std_read(
            reader,
            bincode::config::standard(),
        )?)
    }
    /// Encodes object to [std::io::Write]
    #[inline]
    fn encode<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        bincode::serde::encode_into_std_write(self, writer, bincode::config::standard())?;
        Ok(())
    }
}

impl<T> Filing for T where
    T: Sized + Codec + serde::ser::Serialize + for<'de> serde::de::Deserialize<'de>
{
}

/// Encoding and decoding to/from [File]
pub trait Filing: Codec
where
    Self: Sized + serde::ser::Serialize + for<'de> serde::de::Deserialize<'de>,
{
    /// Decodes object from given path
    fn from_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path> + Debug,
    {
        log::info!("decoding from {path:?}");
        let file =
            File::open(&path).map_err(|e| FilingError::Open(e, path.as_ref().to_path_buf()))?;
        let mut buffer = std::io::BufReader::new(file);
        Self::decode(&mut buffer)
    }
    /// Encodes object to given path, replacing any existing file
    fn to_path<P>(&self, path: P) -> Result<()>
    where
        P: AsRef<Path> + Debug,
    {
        self.to_path_with(path, true)
    }
    /// Encodes object to given path
    ///
    /// Fails with [FilingError::Exists] if the file exists and `overwrite` is `false`
    fn to_path_with<P>(&self, path: P, overwrite: bool) -> Result<()>
    where
        P: AsRef<Path> + Debug,
    {
        log::info!("encoding to {path:?}");
        let file = if overwrite {
            File::create(&path)
        } else {
            File::options().write(true).create_new(true).open(&path)
        }
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => FilingError::Exists(path.as_ref().to_path_buf()),
            _ => FilingError::Create(e, path.as_ref().to_path_buf()),
        })?;
        let mut buffer = std::io::BufWriter::new(file);
        self.encode(&mut buffer)?;
        buffer.flush()?;
        Ok(())
    }
}

/// Data repository
///
/// Artifacts are read from `read_path` and written into tracking number
/// directories `<write_path>/<YYYYMMDD_hhmmss>`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRepo {
    read_path: PathBuf,
    write_path: PathBuf,
}

impl DataRepo {
    pub fn new(read_path: impl Into<PathBuf>, write_path: impl Into<PathBuf>) -> Self {
        Self {
            read_path: read_path.into(),
            write_path: write_path.into(),
        }
    }
    pub fn read_path(&self) -> &Path {
        &self.read_path
    }
    pub fn write_path(&self) -> &Path {
        &self.write_path
    }
    /// Returns a new tracking number from the local time
    pub fn tracking_number() -> String {
        chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
    }
    /// Resolves a path relative to the read path
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.read_path.join(path)
    }
    /// Saves the object as `name` in a new tracking number directory
    ///
    /// Returns the path to the saved file
    pub fn save<T: Filing>(&self, object: &T, name: &str, overwrite: bool) -> Result<PathBuf> {
        self.save_as(object, &Self::tracking_number(), name, overwrite)
    }
    /// Saves the object as `name` in the given tracking number directory
    pub fn save_as<T: Filing>(
        &self,
        object: &T,
        tracking_number: &str,
        name: &str,
        overwrite: bool,
    ) -> Result<PathBuf> {
        let dir = self.write_path.join(tracking_number);
        fs::create_dir_all(&dir).map_err(|e| FilingError::Create(e, dir.clone()))?;
        let path = dir.join(name);
        object.to_path_with(&path, overwrite)?;
        Ok(path)
    }
    /// Loads the object at the path relative to the read path
    pub fn load<T: Filing>(&self, path: impl AsRef<Path>) -> Result<T> {
        T::from_path(self.resolve(path))
    }
}
