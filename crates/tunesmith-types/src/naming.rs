//! File-name sanitisation for titles and user-supplied destination names.

/// Longest stem (before the extension) a sanitised name may have.
pub const MAX_FILE_STEM_CHARS: usize = 50;

/// Turn an arbitrary title into a safe file name ending in `.{extension}`.
///
/// Characters outside `[A-Za-z0-9_.-]` become `_`, the stem is capped at
/// [`MAX_FILE_STEM_CHARS`] characters and the extension is forced.  If the
/// input already ends with the extension (any case) it is not doubled.
pub fn sanitize_file_name(name: &str, extension: &str) -> String {
    let extension = extension.trim_start_matches('.');
    let suffix = format!(".{extension}");
    let trimmed = name.trim();
    let stem = if trimmed.len() > suffix.len()
        && trimmed.is_char_boundary(trimmed.len() - suffix.len())
        && trimmed[trimmed.len() - suffix.len()..].eq_ignore_ascii_case(&suffix)
    {
        &trimmed[..trimmed.len() - suffix.len()]
    } else {
        trimmed
    };

    let mut cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_STEM_CHARS)
        .collect();

    if cleaned.is_empty() {
        cleaned.push_str("untitled");
    }
    if extension.is_empty() {
        return cleaned;
    }
    format!("{cleaned}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_unsafe_characters() {
        assert_eq!(
            sanitize_file_name("Music for lo-fi beats / rain", "wav"),
            "Music_for_lo-fi_beats___rain.wav"
        );
    }

    #[test]
    fn caps_stem_length() {
        let long = "a".repeat(120);
        let name = sanitize_file_name(&long, "mp3");
        assert_eq!(name.len(), MAX_FILE_STEM_CHARS + ".mp3".len());
        assert!(name.ends_with(".mp3"));
    }

    #[test]
    fn does_not_double_the_extension() {
        assert_eq!(sanitize_file_name("take_one.WAV", "wav"), "take_one.wav");
        assert_eq!(sanitize_file_name("take_one.mp3", ".wav"), "take_one.mp3.wav");
    }

    #[test]
    fn empty_and_non_ascii_titles_still_produce_a_name() {
        assert_eq!(sanitize_file_name("   ", "wav"), "untitled.wav");
        assert_eq!(sanitize_file_name("école", "wav"), "_cole.wav");
    }

    #[test]
    fn path_separators_never_survive() {
        let name = sanitize_file_name("../../etc/passwd", "wav");
        assert!(!name.contains('/'));
        assert!(!name.contains('\\'));
    }
}
