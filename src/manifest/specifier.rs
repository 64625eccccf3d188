//! Version specifiers (`>=1.0,<2`, `~=0.100`, `==1.*`)

use super::version::Version;
use super::ManifestError;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
    Compatible,
    Arbitrary,
}

impl Operator {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            "<=" => Operator::LessEqual,
            ">=" => Operator::GreaterEqual,
            "<" => Operator::Less,
            ">" => Operator::Greater,
            "~=" => Operator::Compatible,
            "===" => Operator::Arbitrary,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessEqual => "<=",
            Operator::GreaterEqual => ">=",
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::Compatible => "~=",
            Operator::Arbitrary => "===",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Specifier {
    pub operator: Operator,
    /// Version text as written, without any `.*` suffix
    pub raw: String,
    /// Parsed version; `None` only for `===` against a non-PEP 440 string
    pub version: Option<Version>,
    pub wildcard: bool,
}

fn specifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(===|~=|==|!=|<=|>=|<|>)\s*([^\s,;]+)\s*$").expect("valid regex")
    })
}

impl Specifier {
    pub fn parse(input: &str) -> Result<Self, ManifestError> {
        let invalid = |reason: &str| ManifestError::InvalidSpecifier {
            specifier: input.trim().to_string(),
            reason: reason.to_string(),
        };

        let caps = specifier_re()
            .captures(input)
            .ok_or_else(|| invalid("expected an operator followed by a version"))?;
        let operator = Operator::parse(&caps[1]).ok_or_else(|| invalid("unknown operator"))?;
        let text = &caps[2];

        if operator == Operator::Arbitrary {
            return Ok(Self {
                operator,
                raw: text.to_string(),
                version: Version::parse(text).ok(),
                wildcard: false,
            });
        }

        let (raw, wildcard) = match text.strip_suffix(".*") {
            Some(prefix) => (prefix, true),
            None => (text, false),
        };
        if wildcard && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(invalid("'.*' is only allowed with == and !="));
        }

        let version = Version::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if wildcard && (version.is_prerelease() || version.post.is_some() || version.local.is_some())
        {
            return Err(invalid("'.*' requires a plain release prefix"));
        }
        if operator == Operator::Compatible && version.release.len() < 2 {
            return Err(invalid("'~=' needs at least two release segments"));
        }
        if version.local.is_some() && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(invalid("local versions are only allowed with == and !="));
        }

        Ok(Self {
            operator,
            raw: raw.to_string(),
            version: Some(version),
            wildcard,
        })
    }

    /// Whether this specifier explicitly names a pre-release
    pub fn names_prerelease(&self) -> bool {
        !matches!(self.operator, Operator::NotEqual)
            && self.version.as_ref().is_some_and(Version::is_prerelease)
    }

    pub fn contains(&self, candidate: &Version) -> bool {
        let Some(spec) = &self.version else {
            return self.raw.eq_ignore_ascii_case(&candidate.to_string());
        };

        match self.operator {
            Operator::Equal if self.wildcard => prefix_match(spec, candidate),
            Operator::NotEqual if self.wildcard => !prefix_match(spec, candidate),
            Operator::Equal => exact_match(spec, candidate),
            Operator::NotEqual => !exact_match(spec, candidate),
            Operator::LessEqual => candidate.public() <= *spec,
            Operator::GreaterEqual => candidate.public() >= *spec,
            Operator::Less => {
                candidate.public() < *spec
                    && !(!spec.is_prerelease()
                        && candidate.is_prerelease()
                        && candidate.base() == spec.base())
            }
            Operator::Greater => {
                candidate.public() > *spec
                    && !(!spec.is_postrelease()
                        && candidate.is_postrelease()
                        && candidate.base() == spec.base())
                    && !(candidate.local.is_some() && candidate.base() == spec.base())
            }
            Operator::Compatible => {
                let prefix = Version {
                    release: spec.release[..spec.release.len() - 1].to_vec(),
                    ..spec.base()
                };
                candidate.public() >= *spec && prefix_match(&prefix, candidate)
            }
            Operator::Arbitrary => self.raw.eq_ignore_ascii_case(&candidate.to_string()),
        }
    }
}

fn exact_match(spec: &Version, candidate: &Version) -> bool {
    if spec.local.is_some() {
        candidate == spec
    } else {
        candidate.public() == *spec
    }
}

/// `==prefix.*` semantics: epoch equal and release starting with the prefix
fn prefix_match(prefix: &Version, candidate: &Version) -> bool {
    if prefix.epoch != candidate.epoch {
        return false;
    }
    prefix
        .release
        .iter()
        .enumerate()
        .all(|(i, n)| candidate.release.get(i).copied().unwrap_or(0) == *n)
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator.as_str(), self.raw)?;
        if self.wildcard {
            f.write_str(".*")?;
        }
        Ok(())
    }
}

/// Comma-separated conjunction of specifiers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecifierSet(pub Vec<Specifier>);

impl SpecifierSet {
    pub fn parse(input: &str) -> Result<Self, ManifestError> {
        let input = input.trim();
        let input = input
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(input);
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        input
            .split(',')
            .map(Specifier::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(SpecifierSet)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, other: &SpecifierSet) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn names_prerelease(&self) -> bool {
        self.0.iter().any(Specifier::names_prerelease)
    }

    pub fn contains(&self, candidate: &Version) -> bool {
        self.0.iter().all(|spec| spec.contains(candidate))
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Specifier::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn set(s: &str) -> SpecifierSet {
        SpecifierSet::parse(s).unwrap()
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[parameterized(
        exact = { "==0.100.0", "0.100.0", true },
        exact_trailing_zero = { "==0.100", "0.100.0", true },
        exact_other = { "==0.100.0", "0.100.1", false },
        exact_ignores_local = { "==1.0", "1.0+cpu", true },
        wildcard = { "==1.4.*", "1.4.9", true },
        wildcard_miss = { "==1.4.*", "1.5.0", false },
        not_wildcard = { "!=1.4.*", "1.5.0", true },
        compatible = { "~=2.2", "2.9", true },
        compatible_upper = { "~=2.2", "3.0", false },
        compatible_patch = { "~=1.4.5", "1.4.9", true },
        compatible_patch_upper = { "~=1.4.5", "1.5.0", false },
        less_excludes_own_pre = { "<2.0", "2.0rc1", false },
        less_allows_older_pre = { "<2.0", "1.9rc1", true },
        greater_excludes_own_post = { ">1.0", "1.0.post1", false },
        greater_allows_next = { ">1.0", "1.0.1", true },
        range = { ">=1.0,<2", "1.7", true },
        range_miss = { ">=1.0,<2", "2.0", false },
        parenthesized = { "(>=1.0)", "1.0", true },
        arbitrary = { "===1.0", "1.0", true },
        arbitrary_miss = { "===1.0", "1.0.0", false },
    )]
    fn test_contains(specs: &str, candidate: &str, expected: bool) {
        assert_eq!(set(specs).contains(&v(candidate)), expected);
    }

    #[parameterized(
        no_operator = { "1.0" },
        wildcard_with_ge = { ">=1.*" },
        compatible_single = { "~=1" },
        bad_version = { "==banana" },
        local_with_ge = { ">=1.0+local" },
    )]
    fn test_invalid(input: &str) {
        assert!(SpecifierSet::parse(input).is_err());
    }

    #[test]
    fn test_empty_set_contains_everything() {
        let specs = set("");
        assert!(specs.is_empty());
        assert!(specs.contains(&v("0.0.1")));
    }

    #[test]
    fn test_names_prerelease() {
        assert!(set(">=1.0b1").names_prerelease());
        assert!(!set(">=1.0").names_prerelease());
        assert!(!set("!=1.0b1").names_prerelease());
    }

    #[test]
    fn test_display_is_compact() {
        assert_eq!(set(">= 1.0 , != 2.*").to_string(), ">=1.0,!=2.*");
    }
}
