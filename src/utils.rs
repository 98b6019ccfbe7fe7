use indicatif::ProgressStyle;
use itertools::Itertools;

pub fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {human_pos}/{human_len} {percent}% ({per_sec})")
        .expect("hardcoded")
}

/// Flattens repeated comma or space separated values, dropping blanks and repeats.
pub fn split_list<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values
        .iter()
        .flat_map(|x| {
            x.as_ref()
                .split(|c: char| c == ',' || c.is_whitespace())
                .map(str::to_string)
                .collect_vec()
        })
        .filter(|x| !x.is_empty())
        .unique()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_mixed_separators() {
        assert_eq!(
            split_list(&["aldi,kroger", " meijer  aldi", ""]),
            vec!["aldi", "kroger", "meijer"]
        );
        assert!(split_list::<&str>(&[]).is_empty());
    }
}
