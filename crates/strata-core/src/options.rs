/// Byte range for reads: `[start, end)`. Unset bounds default to the whole
/// file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ReadOptions {
    pub fn range(start: u64, end: u64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `AlreadyExists` if the target exists.
    #[default]
    Write,
    Overwrite,
    Append,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub mode: WriteMode,
}

impl WriteOptions {
    pub fn overwrite() -> Self {
        Self {
            mode: WriteMode::Overwrite,
        }
    }

    pub fn append() -> Self {
        Self {
            mode: WriteMode::Append,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub recursive: bool,
}

impl ListOptions {
    pub fn recursive() -> Self {
        Self { recursive: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    pub overwrite: bool,
    pub recursive: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub recursive: bool,
}

impl DeleteOptions {
    pub fn recursive() -> Self {
        Self { recursive: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateDirectoryOptions {
    pub create_parents: bool,
}

impl CreateDirectoryOptions {
    pub fn create_parents() -> Self {
        Self {
            create_parents: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveOptions {
    pub overwrite: bool,
    pub recursive: bool,
}
