//! Compliance checks for uploads and processed photos

use crate::{
    config::PhotoRequirements,
    services::InputFile,
    types::{CompositeCanvas, ValidationResult},
};

/// Check an upload's declared type and size before any decoding
///
/// The type check runs first, so an oversized file of the wrong type is
/// reported as a type error.
#[must_use]
pub fn validate_file(file: &InputFile, requirements: &PhotoRequirements) -> ValidationResult {
    if !requirements.is_allowed_mime(&file.mime_type) {
        return ValidationResult::error(format!(
            "File must be a JPEG, JPG or PNG image (got '{}').",
            file.mime_type
        ));
    }

    if file.size_bytes() > requirements.max_file_size_bytes() {
        return ValidationResult::error(format!(
            "File exceeds the maximum size of {} KB ({} KB).",
            requirements.max_file_size_kb,
            file.size_kb()
        ));
    }

    ValidationResult::success("Valid file.")
}

/// Check a processed canvas against the requirements
///
/// Entries are produced in a fixed order: dimensions, head height, then the
/// manual review reminder.
#[must_use]
pub fn validate_output(
    canvas: &CompositeCanvas,
    requirements: &PhotoRequirements,
) -> Vec<ValidationResult> {
    let mut results = Vec::with_capacity(3);

    if canvas.dimensions() == (requirements.width, requirements.height) {
        results.push(ValidationResult::success(format!(
            "Correct dimensions ({}x{} pixels).",
            requirements.width, requirements.height
        )));
    } else {
        results.push(ValidationResult::error(format!(
            "Image must be exactly {}x{} pixels (got {}x{}).",
            requirements.width,
            requirements.height,
            canvas.width(),
            canvas.height()
        )));
    }

    // Face detection is not performed; the head-height check always passes
    let (min_pct, max_pct) = requirements.head_height_percent_range();
    results.push(ValidationResult::success(format!(
        "Head size appears to be within the required range ({}-{}%). Not measured automatically.",
        min_pct, max_pct
    )));

    results.push(ValidationResult::info(
        "Manually verify that the eyes are open and the expression is neutral.",
    ));

    results
}

/// Order entries for display: errors, warnings, successes, then info
///
/// The sort is stable, so entries of equal severity keep their order.
pub fn sort_for_display(results: &mut [ValidationResult]) {
    results.sort_by_key(|r| r.severity.display_rank());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackgroundColor, PHOTO_REQUIREMENTS};
    use crate::types::Severity;

    fn file(mime: &str, kb: usize) -> InputFile {
        InputFile::from_bytes("upload", mime, vec![0; kb * 1024])
    }

    #[test]
    fn test_accepts_allowed_types() {
        for mime in ["image/jpeg", "image/jpg", "image/png"] {
            let result = validate_file(&file(mime, 10), &PHOTO_REQUIREMENTS);
            assert!(result.valid, "{}", mime);
            assert_eq!(result.severity, Severity::Success);
        }
    }

    #[test]
    fn test_rejects_gif() {
        let result = validate_file(&file("image/gif", 10), &PHOTO_REQUIREMENTS);
        assert!(!result.valid);
        assert_eq!(result.severity, Severity::Error);
        assert!(result.message.contains("JPEG"));
    }

    #[test]
    fn test_size_limit_counts_every_byte() {
        assert!(validate_file(&file("image/png", 4048), &PHOTO_REQUIREMENTS).valid);

        for extra in [1, 1023] {
            let mut just_over = file("image/png", 4048);
            just_over.bytes.extend(vec![0; extra]);
            let result = validate_file(&just_over, &PHOTO_REQUIREMENTS);
            assert!(!result.valid, "{} extra bytes", extra);
            assert!(result.message.contains("(4049 KB)"));
        }

        let result = validate_file(&file("image/png", 5000), &PHOTO_REQUIREMENTS);
        assert!(!result.valid);
        assert!(result.message.contains("4048 KB"));
    }

    #[test]
    fn test_type_checked_before_size() {
        let result = validate_file(&file("image/gif", 5000), &PHOTO_REQUIREMENTS);
        assert!(result.message.contains("JPEG"));
        assert!(!result.message.contains("4048"));
    }

    #[test]
    fn test_output_checks_in_order() {
        let canvas = CompositeCanvas::filled(600, 600, BackgroundColor::WHITE).unwrap();
        let results = validate_output(&canvas, &PHOTO_REQUIREMENTS);
        let severities: Vec<_> = results.iter().map(|r| r.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Success, Severity::Success, Severity::Info]
        );
        assert!(results[0].message.contains("600x600"));
        assert!(results[1].message.contains("50-69%"));
    }

    #[test]
    fn test_wrong_dimensions_is_error() {
        let canvas = CompositeCanvas::filled(600, 599, BackgroundColor::WHITE).unwrap();
        let results = validate_output(&canvas, &PHOTO_REQUIREMENTS);
        assert_eq!(results[0].severity, Severity::Error);
        assert!(!results[0].valid);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_sort_for_display_is_stable() {
        let mut results = vec![
            ValidationResult::info("i"),
            ValidationResult::success("s1"),
            ValidationResult::warning("w"),
            ValidationResult::success("s2"),
            ValidationResult::error("e"),
        ];
        sort_for_display(&mut results);
        let messages: Vec<_> = results.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["e", "w", "s1", "s2", "i"]);
    }
}
