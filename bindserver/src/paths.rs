//! Translation of driver-host paths into their serving-host equivalents.
//!
//! Both hosts see the same three locations (tested JDK, test base, work
//! directory) under different roots and possibly different separator styles.
//! The driver always speaks in its own view; the server rewrites prefixes
//! before touching the filesystem.

use bindfile::HostView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// A path matching no configured prefix is an error.
    Strict,
    /// A path matching no configured prefix passes through unchanged. Used
    /// only for debuggee arguments after argv[0], which may not be paths at
    /// all.
    BestEffort,
}

#[derive(Debug, Clone)]
struct PrefixRule {
    from: String,
    to: String,
}

#[derive(Debug, Clone)]
pub struct PathTranslator {
    rules: Vec<PrefixRule>,
}

impl PathTranslator {
    /// Build the 3-way mapping from the `from` host's view to the `to`
    /// host's view.
    pub fn between(from: &HostView, to: &HostView) -> Self {
        let rule = |from: &str, to: &str| PrefixRule {
            from: from.to_string(),
            to: to.to_string(),
        };
        Self {
            rules: vec![
                rule(&from.tested_java_home, &to.tested_java_home),
                rule(&from.testbase, &to.testbase),
                rule(&from.workdir, &to.workdir),
            ],
        }
    }

    /// The reverse mapping; translating there and back reproduces a path up
    /// to separator normalization.
    pub fn inverted(&self) -> Self {
        Self {
            rules: self
                .rules
                .iter()
                .map(|rule| PrefixRule {
                    from: rule.to.clone(),
                    to: rule.from.clone(),
                })
                .collect(),
        }
    }

    pub fn translate(&self, path: &str, strictness: Strictness) -> eyre::Result<String> {
        // the work dir usually nests under the test base: longest match wins
        let best = self
            .rules
            .iter()
            .filter(|rule| prefix_matches(path, &rule.from))
            .max_by_key(|rule| rule.from.len());

        match best {
            Some(rule) => {
                let separator = separator_of(&rule.to);
                let suffix = retarget(&path[rule.from.len()..], separator);
                Ok(format!("{}{}", rule.to, suffix))
            }
            None => match strictness {
                Strictness::Strict => {
                    eyre::bail!("path {path:?} does not match any configured prefix")
                }
                Strictness::BestEffort => Ok(path.to_string()),
            },
        }
    }
}

/// Prefix match on a separator boundary, so `/base/test` does not claim
/// `/base/testbase/...`.
fn prefix_matches(path: &str, prefix: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    match path.as_bytes().get(prefix.len()) {
        None => true,
        Some(&next) => next == b'/' || next == b'\\',
    }
}

fn separator_of(prefix: &str) -> char {
    if prefix.contains('\\') {
        '\\'
    } else {
        '/'
    }
}

fn retarget(suffix: &str, separator: char) -> String {
    suffix
        .chars()
        .map(|c| if c == '/' || c == '\\' { separator } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> PathTranslator {
        PathTranslator::between(
            &HostView {
                tested_java_home: "/export/jdk/linux".to_string(),
                workdir: "/testbase/WORKDIR".to_string(),
                testbase: "/testbase".to_string(),
            },
            &HostView {
                tested_java_home: "/usr/jdk".to_string(),
                workdir: "/srv/work".to_string(),
                testbase: "/srv/testbase".to_string(),
            },
        )
    }

    #[test]
    fn replaces_the_matching_prefix() {
        let translated = translator()
            .translate("/testbase/WORKDIR/foo", Strictness::Strict)
            .unwrap();
        assert_eq!(translated, "/srv/work/foo");
    }

    #[test]
    fn longest_prefix_wins_over_the_nesting_testbase() {
        let t = translator();
        assert_eq!(
            t.translate("/testbase/WORKDIR", Strictness::Strict).unwrap(),
            "/srv/work"
        );
        assert_eq!(
            t.translate("/testbase/classes", Strictness::Strict).unwrap(),
            "/srv/testbase/classes"
        );
    }

    #[test]
    fn prefix_must_end_on_a_separator_boundary() {
        let err = translator()
            .translate("/testbaseline/foo", Strictness::Strict)
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn strict_miss_fails_best_effort_passes_through() {
        let t = translator();
        assert!(t.translate("-verbose:gc", Strictness::Strict).is_err());
        assert_eq!(
            t.translate("-verbose:gc", Strictness::BestEffort).unwrap(),
            "-verbose:gc"
        );
    }

    #[test]
    fn converts_separators_to_the_target_style() {
        let t = PathTranslator::between(
            &HostView {
                tested_java_home: "/export/jdk".to_string(),
                workdir: "/testbase/WORKDIR".to_string(),
                testbase: "/testbase".to_string(),
            },
            &HostView {
                tested_java_home: r"D:\jdk".to_string(),
                workdir: r"D:\testbase\WORKDIR".to_string(),
                testbase: r"D:\testbase".to_string(),
            },
        );
        assert_eq!(
            t.translate("/testbase/WORKDIR/a/b.class", Strictness::Strict)
                .unwrap(),
            r"D:\testbase\WORKDIR\a\b.class"
        );
    }

    #[test]
    fn round_trips_through_the_inverted_table() {
        let t = translator();
        let there = t
            .translate("/testbase/WORKDIR/logs/run.log", Strictness::Strict)
            .unwrap();
        let back = t.inverted().translate(&there, Strictness::Strict).unwrap();
        assert_eq!(back, "/testbase/WORKDIR/logs/run.log");
    }
}
