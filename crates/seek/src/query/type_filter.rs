//! `type:` category tables.

/// Resolution of a `type:` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTarget {
    /// `folder` / `directory`.
    Directory,
    /// A named category expanding to an extension set.
    Extensions(&'static [&'static str]),
    /// Unknown category values match the literal extension.
    Literal(String),
}

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "ico", "svg", "heic", "heif",
    "raw", "arw", "cr2", "orf", "raf", "psd", "ai",
];

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "avi", "mkv", "wmv", "webm", "flv", "mpg", "mpeg", "3gp", "3g2", "ts",
    "mts", "m2ts",
];

pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "aac", "ogg", "oga", "opus", "wma", "m4a", "alac", "aiff",
];

pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "txt", "md", "rst", "doc", "docx", "rtf", "odt", "pdf", "pages", "rtfd", "ppt", "pptx",
    "key", "odp", "xls", "xlsx", "csv", "numbers", "ods",
];

pub const CODE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "c", "cc", "cpp", "cxx", "h", "hpp", "hh", "java", "cs",
    "py", "go", "rb", "swift", "kt", "kts", "php", "html", "css", "scss", "sass", "less",
    "json", "yaml", "yml", "toml", "ini", "cfg", "sh", "zsh", "fish", "ps1", "sql", "lua",
    "pl", "pm", "r", "m", "mm", "dart", "scala", "ex", "exs",
];

pub const ARCHIVE_EXTENSIONS: &[&str] = &[
    "zip", "rar", "7z", "tar", "gz", "tgz", "bz2", "xz", "zst", "cab", "iso", "dmg",
];

/// Resolves a `type:` value (already trimmed) to its target.
pub fn lookup_type_target(value: &str) -> TypeTarget {
    match value.to_ascii_lowercase().as_str() {
        "folder" | "directory" => TypeTarget::Directory,
        "image" => TypeTarget::Extensions(IMAGE_EXTENSIONS),
        "video" => TypeTarget::Extensions(VIDEO_EXTENSIONS),
        "audio" => TypeTarget::Extensions(AUDIO_EXTENSIONS),
        "document" => TypeTarget::Extensions(DOCUMENT_EXTENSIONS),
        "code" => TypeTarget::Extensions(CODE_EXTENSIONS),
        "archive" => TypeTarget::Extensions(ARCHIVE_EXTENSIONS),
        other => TypeTarget::Literal(other.trim_start_matches('.').to_string()),
    }
}
