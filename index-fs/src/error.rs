use derive_more::Display;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[display(fmt = "no such file or directory")]
    NotFound,
    #[display(fmt = "file exists")]
    AlreadyExists,
    #[display(fmt = "file name too long")]
    NameTooLong,
    #[display(fmt = "path too long")]
    PathTooLong,
    #[display(fmt = "invalid file name")]
    InvalidName,
    #[display(fmt = "no space left on device")]
    OutOfSpace,
    #[display(fmt = "file too large")]
    FileTooLarge,
    #[display(fmt = "file is denying writes")]
    WriteDenied,
    #[display(fmt = "corrupt inode record")]
    CorruptRecord,
    #[display(fmt = "not a directory")]
    NotADirectory,
    #[display(fmt = "directory not empty")]
    DirectoryNotEmpty,
    #[display(fmt = "cannot remove the root directory")]
    IsRoot,
    #[display(fmt = "block device error: {:?}", _0)]
    Device(block_dev::Error),
}

impl From<block_dev::Error> for Error {
    #[inline]
    fn from(err: block_dev::Error) -> Self {
        Self::Device(err)
    }
}

impl core::error::Error for Error {}
