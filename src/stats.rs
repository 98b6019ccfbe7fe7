use std::fmt::{self, Write};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub new_stores: usize,
    pub duplicates_skipped: usize,
    pub no_geometry: usize,
    pub wrong_zipcode: usize,
    pub errors: usize,
    /// Size of the ZIP restriction, if any.
    pub target_zipcodes: Option<usize>,
}

impl fmt::Display for ImportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        writeln!(out, "## Statistics")?;
        if let Some(x) = self.target_zipcodes {
            writeln!(out, "Target ZIP codes: {x}")?;
        }
        writeln!(out, "New stores: {}", self.new_stores)?;
        writeln!(out, "Duplicates skipped: {}", self.duplicates_skipped)?;
        writeln!(out, "No geometry: {}", self.no_geometry)?;
        if self.target_zipcodes.is_some() || self.wrong_zipcode > 0 {
            writeln!(out, "Wrong ZIP code: {}", self.wrong_zipcode)?;
        }
        writeln!(out, "Errors: {}", self.errors)?;
        f.write_str(&out)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackfillStats {
    pub precise_matches: usize,
    pub centroid_upgrades: usize,
    pub zip_fallback: usize,
    pub kept_centroid: usize,
    pub failed: usize,
    pub permanently_skipped: usize,
    pub newly_skipped: usize,
    pub errors: usize,
}

impl BackfillStats {
    pub fn processed(&self) -> usize {
        self.precise_matches + self.centroid_upgrades + self.zip_fallback + self.kept_centroid + self.failed
    }
}

impl fmt::Display for BackfillStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        writeln!(out, "## Statistics")?;
        writeln!(out, "Precise matches: {}", self.precise_matches)?;
        writeln!(out, "Centroid upgrades: {}", self.centroid_upgrades)?;
        writeln!(out, "ZIP centroid fallback: {}", self.zip_fallback)?;
        writeln!(out, "Kept centroid: {}", self.kept_centroid)?;
        writeln!(out, "Failed: {}", self.failed)?;
        writeln!(out, "Total processed: {}", self.processed())?;
        writeln!(out, "Permanently skipped: {}", self.permanently_skipped)?;
        writeln!(out, "Newly skipped: {}", self.newly_skipped)?;
        writeln!(out, "Errors: {}", self.errors)?;
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_zipcode_only_when_relevant() {
        let nationwide = ImportStats {
            new_stores: 3,
            ..Default::default()
        };
        let text = nationwide.to_string();
        assert!(text.contains("New stores: 3"));
        assert!(!text.contains("Wrong ZIP code"));

        let restricted = ImportStats {
            wrong_zipcode: 7,
            target_zipcodes: Some(2),
            ..Default::default()
        };
        let text = restricted.to_string();
        assert!(text.contains("Target ZIP codes: 2"));
        assert!(text.contains("Wrong ZIP code: 7"));
    }

    #[test]
    fn backfill_total() {
        let stats = BackfillStats {
            precise_matches: 2,
            centroid_upgrades: 1,
            zip_fallback: 4,
            kept_centroid: 1,
            failed: 3,
            permanently_skipped: 9,
            ..Default::default()
        };
        assert_eq!(stats.processed(), 11);
        assert!(stats.to_string().contains("Total processed: 11"));
    }
}
