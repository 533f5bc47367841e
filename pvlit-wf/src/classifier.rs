//! Track classification rules
//!
//! Every string-matching rule for mapping an endpoint's classification result
//! to a processing track lives here, in one pure function with an explicit
//! precedence order. No I/O, fully deterministic.

use crate::models::Track;

/// Map a classification result to a processing track.
///
/// Precedence, first match wins:
/// 1. Confirmed flag, or a "probable case" / "requires manual review" label,
///    always lands in ICSR - even when the label itself says otherwise.
/// 2. "Probable area of interest" label, or a secondary label indicating an
///    area of interest, lands in AOI.
/// 3. "No case" label (or a bare "no" with no contradicting secondary label)
///    lands in NoCase.
/// 4. Anything else returns `None`: the record is held for manual triage
///    without a track, never silently defaulted.
pub fn classify(label: &str, confirmed_flag: bool, secondary_label: Option<&str>) -> Option<Track> {
    let label = label.trim().to_lowercase();
    let secondary = secondary_label.map(|s| s.trim().to_lowercase());

    if confirmed_flag
        || label.contains("probable case")
        || label.contains("requires manual review")
    {
        return Some(Track::Icsr);
    }

    let secondary_is_aoi = secondary
        .as_deref()
        .map(indicates_area_of_interest)
        .unwrap_or(false);
    if label.contains("probable area of interest")
        || label.contains("probable area-of-interest")
        || secondary_is_aoi
    {
        return Some(Track::Aoi);
    }

    let secondary_is_absent_or_no = match secondary.as_deref() {
        None | Some("") | Some("no") => true,
        Some(_) => false,
    };
    if label.contains("no case") || (label == "no" && secondary_is_absent_or_no) {
        return Some(Track::NoCase);
    }

    None
}

fn indicates_area_of_interest(s: &str) -> bool {
    s == "aoi" || s.contains("area of interest") || s.contains("area-of-interest")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmed_flag_wins_over_contradicting_label() {
        // Confirmed hint dominates even an explicit "no case" label
        assert_eq!(classify("no case", true, None), Some(Track::Icsr));
        assert_eq!(classify("no case", true, Some("no")), Some(Track::Icsr));
    }

    #[test]
    fn test_probable_case_labels() {
        assert_eq!(classify("Probable case", false, None), Some(Track::Icsr));
        assert_eq!(
            classify("ambiguous - requires manual review", false, None),
            Some(Track::Icsr)
        );
    }

    #[test]
    fn test_aoi_labels() {
        assert_eq!(
            classify("Probable area of interest", false, None),
            Some(Track::Aoi)
        );
        assert_eq!(
            classify("probable area-of-interest", false, None),
            Some(Track::Aoi)
        );
        assert_eq!(classify("unclear", false, Some("AOI")), Some(Track::Aoi));
        assert_eq!(
            classify("unclear", false, Some("possible area of interest")),
            Some(Track::Aoi)
        );
    }

    #[test]
    fn test_icsr_beats_aoi_precedence() {
        // Rule 1 is evaluated before rule 2
        assert_eq!(
            classify("probable case", false, Some("aoi")),
            Some(Track::Icsr)
        );
    }

    #[test]
    fn test_no_case_labels() {
        assert_eq!(classify("No case", false, None), Some(Track::NoCase));
        assert_eq!(classify("no", false, None), Some(Track::NoCase));
        assert_eq!(classify("no", false, Some("no")), Some(Track::NoCase));
        assert_eq!(classify("no", false, Some("")), Some(Track::NoCase));
    }

    #[test]
    fn test_bare_no_with_contradicting_secondary_is_unset() {
        // "no" with a non-"no" secondary label is ambiguous, held for triage
        assert_eq!(classify("no", false, Some("maybe")), None);
    }

    #[test]
    fn test_unknown_labels_are_held_without_track() {
        assert_eq!(classify("", false, None), None);
        assert_eq!(classify("inconclusive", false, None), None);
        assert_eq!(classify("yes", false, None), None);
    }
}
