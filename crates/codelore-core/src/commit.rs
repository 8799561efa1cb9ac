//! Commit-message and diff parsing used by git history sync.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::FileChange;

fn task_reference_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s*:?\s+#(\d+)\b").ok()
    })
    .as_ref()
}

/// Task numbers referenced by "closes/fixes/resolves #N" phrases, in order of
/// appearance and without duplicates.
pub fn referenced_task_numbers(message: &str) -> Vec<i64> {
    let mut numbers: Vec<i64> = Vec::new();
    let Some(re) = task_reference_regex() else {
        return numbers;
    };
    for caps in re.captures_iter(message) {
        let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok()) else {
            continue;
        };
        if !numbers.contains(&n) {
            numbers.push(n);
        }
    }
    numbers
}

/// Parse `git show --name-status --format=` output.
///
/// Each non-empty line is `<status>\t<path>` or, for renames and copies,
/// `<status><score>\t<old>\t<new>`; the last path wins so links point at the
/// file as it exists after the commit.
pub fn parse_name_status(text: &str) -> Vec<FileChange> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_end();
            if line.is_empty() {
                return None;
            }
            let mut fields = line.split('\t');
            let status = fields.next()?.trim();
            let path = fields.last()?.trim();
            let change_type = status.chars().next()?;
            if path.is_empty() || !change_type.is_ascii_uppercase() {
                return None;
            }
            Some(FileChange {
                change_type: change_type.to_string(),
                path: path.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_closing_references_case_insensitively() {
        assert_eq!(referenced_task_numbers("Closes #3: fix typo"), vec![3]);
        assert_eq!(referenced_task_numbers("this FIXES #7"), vec![7]);
        assert_eq!(referenced_task_numbers("resolved #12 and fix #4"), vec![12, 4]);
        assert_eq!(referenced_task_numbers("fixed: #9"), vec![9]);
    }

    #[test]
    fn ignores_plain_mentions_and_duplicates() {
        assert!(referenced_task_numbers("see #3 for context").is_empty());
        assert!(referenced_task_numbers("prefix #3").is_empty());
        assert_eq!(referenced_task_numbers("fixes #5, closes #5"), vec![5]);
    }

    #[test]
    fn name_status_takes_new_path_for_renames() {
        let out = "M\tsrc/lib.rs\nA\tREADME.md\nR087\told/name.rs\tnew/name.rs\n\nD\tgone.txt\n";
        let changes = parse_name_status(out);
        let pairs: Vec<(&str, &str)> = changes
            .iter()
            .map(|c| (c.change_type.as_str(), c.path.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("M", "src/lib.rs"),
                ("A", "README.md"),
                ("R", "new/name.rs"),
                ("D", "gone.txt"),
            ]
        );
    }

    #[test]
    fn name_status_skips_garbage_lines() {
        assert!(parse_name_status("\n   \nwarning: something\n").is_empty());
    }
}
