pub mod context;
pub mod error;
pub mod fs;
pub mod helpers;
pub mod options;
pub mod path;
pub mod status;

pub use context::Context;
pub use error::{FsError, FsResult};
pub use fs::{ByteStream, FileSystem, StatusStream, WriteSink, resolve_read_range};
pub use options::{
    CopyOptions, CreateDirectoryOptions, DeleteOptions, ListOptions, MoveOptions, ReadOptions,
    WriteMode, WriteOptions,
};
pub use path::Path;
pub use status::FileStatus;
