use std::path::Path;

use unicode_normalization::UnicodeNormalization;

/// Localized "edited" suffixes (lowercase)
const EXTRA_FORMATS: &[&str] = &[
    "-edited",      // EN
    "-effects",     // EN
    "-smile",       // EN
    "-mix",         // EN
    "-edytowane",   // PL
    "-bearbeitet",  // DE
    "-bewerkt",     // NL
    "-編集済み",     // JA
    "-modificato",  // IT
    "-modifié",     // FR
    "-ha editado",  // ES
    "-editat",      // CA
];

/// Whether a file is an edited variant Google exports next to the original.
pub fn is_extra(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let name: String = stem.nfc().collect::<String>().to_lowercase();
    EXTRA_FORMATS.iter().any(|extra| name.ends_with(extra))
}

/// Strip an "edited" suffix from the stem of `filename`, keeping the
/// extension. Used to find the original's sidecar.
pub fn remove_extra(filename: &str) -> String {
    let normalized: String = filename.nfc().collect();
    let (stem, ext) = match normalized.rfind('.') {
        Some(dot) if dot > 0 => normalized.split_at(dot),
        _ => (normalized.as_str(), ""),
    };
    for extra in EXTRA_FORMATS {
        // Compare char-wise so case folding never shifts byte offsets
        let extra_chars = extra.chars().count();
        let stem_chars = stem.chars().count();
        if stem_chars < extra_chars {
            continue;
        }
        let split = stem
            .char_indices()
            .nth(stem_chars - extra_chars)
            .map_or(stem.len(), |(i, _)| i);
        if stem[split..].to_lowercase() == *extra {
            return format!("{}{}", &stem[..split], ext);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_extra() {
        assert!(is_extra(Path::new("IMG_1234-edited.jpg")));
        assert!(is_extra(Path::new("Photos from 2020/IMG_1234-EDITED.jpg")));
        assert!(is_extra(Path::new("DSC-bearbeitet.png")));
        assert!(!is_extra(Path::new("IMG_1234.jpg")));
        assert!(!is_extra(Path::new("edited.jpg")));
    }

    #[test]
    fn test_remove_extra() {
        assert_eq!(remove_extra("IMG_1234-edited.jpg"), "IMG_1234.jpg");
        assert_eq!(remove_extra("Foto-Modifié.jpeg"), "Foto.jpeg");
        assert_eq!(remove_extra("写真-編集済み.jpg"), "写真.jpg");
        assert_eq!(remove_extra("IMG_1234.jpg"), "IMG_1234.jpg");
    }
}
