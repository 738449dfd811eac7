use std::path::{Component, Path};

use crate::TransferError;

/// Validates a peer-supplied file name before it is joined onto a
/// download directory.
///
/// Rejects:
/// - Empty names and `.`
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
/// - Anything with a directory part, on either separator
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.trim().is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(TransferError::InvalidName(format!(
            "directory separators not allowed: {name}"
        )));
    }
    if name.contains('\0') {
        return Err(TransferError::InvalidName("NUL byte in name".into()));
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return Err(TransferError::InvalidName(format!(
            "absolute path not allowed: {name}"
        )));
    }

    let mut normal = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidName(format!(
                    "parent directory traversal not allowed: {name}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidName(format!(
                    "path prefix not allowed: {name}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidName(format!(
                    "absolute path not allowed: {name}"
                )));
            }
            Component::CurDir => {}
            Component::Normal(_) => normal += 1,
        }
    }

    if normal != 1 {
        return Err(TransferError::InvalidName(format!(
            "not a plain file name: {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(validate_file_name("photo.jpg").is_ok());
        assert!(validate_file_name("archive.tar.gz").is_ok());
        assert!(validate_file_name("no extension").is_ok());
        assert!(validate_file_name(".hidden").is_ok());
        assert!(validate_file_name("naïve résumé.pdf").is_ok());
    }

    #[test]
    fn rejects_empty_and_dot() {
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("   ").is_err());
        assert!(validate_file_name(".").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("../../../etc/passwd").is_err());
        assert!(validate_file_name("..\\..\\boot.ini").is_err());
    }

    #[test]
    fn rejects_absolute_and_prefixed() {
        assert!(validate_file_name("/etc/passwd").is_err());
        assert!(validate_file_name("C:\\Windows\\evil.dll").is_err());
        assert!(validate_file_name("\\\\server\\share\\x").is_err());
    }

    #[test]
    fn rejects_nested_paths() {
        assert!(matches!(
            validate_file_name("sub/dir.txt"),
            Err(TransferError::InvalidName(_))
        ));
    }
}
