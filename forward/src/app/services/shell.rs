// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Very small, safe-ish shell escaper for words passed to the remote shell.
pub fn sh_escape(p: &str) -> String {
    if !p.is_empty()
        && p
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ','))
    {
        return p.to_string();
    }
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Joins words into one remote command line, quoting where needed.
pub fn join_command<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| sh_escape(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_are_left_alone() {
        assert_eq!(sh_escape("--partition=gpu"), "--partition=gpu");
        assert_eq!(sh_escape("/home/u/forward-util/a.sbatch"), "/home/u/forward-util/a.sbatch");
    }

    #[test]
    fn special_characters_are_single_quoted() {
        assert_eq!(sh_escape(""), "''");
        assert_eq!(sh_escape("a b"), "'a b'");
        assert_eq!(sh_escape("$(rm -rf ~)"), "'$(rm -rf ~)'");
        assert_eq!(sh_escape("it's"), r"'it'\''s'");
    }

    #[test]
    fn join_command_quotes_each_word() {
        assert_eq!(
            join_command(["sbatch", "--job-name=nb1", "my dir/x.sbatch"]),
            "sbatch --job-name=nb1 'my dir/x.sbatch'"
        );
    }
}
