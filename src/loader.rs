//! Reads a program image from disk into the code segment (§4.7).

use std::fs;
use std::path::{Path, PathBuf};

use crate::consts::WORD_SIZE;
use crate::error::LoaderError;
use crate::word::{decode_image, Word};

/// Reads `path`, validates its length, and decodes it into the big-endian
/// words that become segment 0's initial contents.
pub fn load_image(path: &Path) -> Result<Vec<Word>, LoaderError> {
    let bytes = fs::read(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if bytes.is_empty() || bytes.len() % WORD_SIZE != 0 {
        return Err(LoaderError::MisalignedImage {
            path: path.to_path_buf(),
            len: bytes.len() as u64,
            word_size: WORD_SIZE,
        });
    }

    decode_image(&bytes[..]).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses the process's single positional argument into a program path.
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<PathBuf, LoaderError> {
    let mut args = args.into_iter();
    let _argv0 = args.next();
    let path = args.next().ok_or(LoaderError::BadUsage)?;

    if args.next().is_some() {
        return Err(LoaderError::BadUsage);
    }

    Ok(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_args_accepts_exactly_one_path() {
        let path = parse_args(["regvm".to_string(), "program.bin".to_string()]).unwrap();
        assert_eq!(path, PathBuf::from("program.bin"));
    }

    #[test]
    fn parse_args_rejects_missing_path() {
        assert!(matches!(
            parse_args(["regvm".to_string()]),
            Err(LoaderError::BadUsage)
        ));
    }

    #[test]
    fn parse_args_rejects_extra_argument() {
        assert!(matches!(
            parse_args(["regvm".to_string(), "a".to_string(), "b".to_string()]),
            Err(LoaderError::BadUsage)
        ));
    }

    #[test]
    fn load_image_rejects_misaligned_length() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(&[0u8, 1, 2]).expect("write temp image");
        let err = load_image(file.path()).unwrap_err();
        assert!(matches!(err, LoaderError::MisalignedImage { len: 3, .. }));
    }

    #[test]
    fn load_image_decodes_words() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(&[0, 0, 0, 0, 0x70, 0, 0, 0])
            .expect("write temp image");
        let words = load_image(file.path()).unwrap();
        assert_eq!(words, vec![0, 0x7000_0000]);
    }
}
