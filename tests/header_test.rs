use vellum::header::{
    decode_header, encode_header, FileHeader, FileKind, HeaderError, HEADER_LEN,
    HEADER_SECTIONS, FORMAT_VERSION, HEADER_VERSION,
};

#[test]
fn test_sections_are_contiguous_and_cover_header() {
    let mut expected_offset = 0;
    for section in HEADER_SECTIONS {
        assert_eq!(section.offset, expected_offset, "section {} misplaced", section.name);
        expected_offset += section.len;
    }
    assert_eq!(expected_offset, HEADER_LEN);
}

#[test]
fn test_magic_registry_is_injective() {
    let kinds = [
        FileKind::QuizFile,
        FileKind::AdminFile,
        FileKind::ThemeFile,
        FileKind::SecureWriteBackup,
    ];
    for a in kinds {
        assert_eq!(FileKind::from_magic(&a.magic()), Some(a));
        for b in kinds {
            if a != b {
                assert_ne!(a.magic(), b.magic(), "{:?} and {:?} share magic", a, b);
            }
        }
    }
    assert_eq!(FileKind::from_magic(&[0u8; 4]), None);
}

#[test]
fn test_roundtrip_current_header() {
    let bytes = encode_header(FORMAT_VERSION, HEADER_VERSION, FileKind::ThemeFile);
    let header = decode_header(&bytes, FileKind::ThemeFile).unwrap();
    assert_eq!(header, FileHeader::current(FileKind::ThemeFile));
}

#[test]
fn test_theme_magic_layout() {
    let bytes = encode_header(1, 1, FileKind::ThemeFile);
    assert_eq!(&bytes[..4], &[0x01, 0xFF, 0x17, 0x12]);
    // Big-endian version fields.
    assert_eq!(&bytes[4..6], &[0x00, 0x01]);
    assert_eq!(&bytes[6..8], &[0x00, 0x01]);
}

#[test]
fn test_short_buffer_is_truncated_header() {
    let err = decode_header(&[0x01, 0xFF], FileKind::ThemeFile).unwrap_err();
    assert!(matches!(
        err,
        HeaderError::TruncatedHeader { expected: 8, actual: 2 }
    ));
}

#[test]
fn test_wrong_magic_is_rejected() {
    let bytes = encode_header(1, 1, FileKind::QuizFile);
    let err = decode_header(&bytes, FileKind::ThemeFile).unwrap_err();
    assert!(matches!(err, HeaderError::UnknownMagicBytes { .. }));
}

#[test]
fn test_unknown_version_pair_is_rejected() {
    let mut bytes = encode_header(1, 1, FileKind::ThemeFile).to_vec();
    bytes[7] = 2; // header version 2 is not in the format-1 allow-list
    let err = decode_header(&bytes, FileKind::ThemeFile).unwrap_err();
    assert!(matches!(
        err,
        HeaderError::UnsupportedHeaderVersion { format_version: 1, header_version: 2 }
    ));

    let mut bytes = encode_header(1, 1, FileKind::ThemeFile).to_vec();
    bytes[5] = 3; // format version 3 has no allow-list at all
    let err = decode_header(&bytes, FileKind::ThemeFile).unwrap_err();
    assert!(matches!(
        err,
        HeaderError::UnsupportedHeaderVersion { format_version: 3, header_version: 1 }
    ));
}
