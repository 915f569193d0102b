pub mod auth;
pub mod fs;
pub mod xml;

pub use fs::{HttpOptions, WebdavConfig, WebdavCredentials, WebdavFileSystem};
