use super::specifier::SpecifierSet;
use super::ManifestError;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// One declared dependency
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    /// Normalized project name
    pub name: String,
    /// Normalized extras, sorted
    pub extras: Vec<String>,
    pub specifiers: SpecifierSet,
    /// Environment marker, kept verbatim for the installer
    pub marker: Option<String>,
    /// Direct reference (`name @ url`)
    pub url: Option<String>,
    /// `--hash` options carried on the same line
    pub hashes: Vec<String>,
}

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<rest>.*)$",
        )
        .expect("valid regex")
    })
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-_.]+").expect("valid regex"))
}

/// Normalizes a project name: lowercase, runs of `-`, `_` and `.` become `-`
pub fn normalize_name(name: &str) -> String {
    separator_re()
        .replace_all(&name.to_lowercase(), "-")
        .into_owned()
}

impl Requirement {
    pub fn parse(line: &str) -> Result<Self, ManifestError> {
        let invalid = |reason: &str| ManifestError::InvalidRequirement {
            requirement: line.trim().to_string(),
            reason: reason.to_string(),
        };

        let (body, hashes) = split_hashes(line).map_err(|reason| invalid(&reason))?;

        let caps = requirement_re()
            .captures(body)
            .ok_or_else(|| invalid("expected a project name"))?;
        let name = normalize_name(&caps["name"]);

        let mut extras = Vec::new();
        if let Some(raw) = caps.name("extras") {
            for extra in raw.as_str().split(',').map(str::trim).filter(|e| !e.is_empty()) {
                if !requirement_re()
                    .captures(extra)
                    .is_some_and(|c| c["rest"].is_empty())
                {
                    return Err(invalid(&format!("invalid extra '{}'", extra)));
                }
                extras.push(normalize_name(extra));
            }
        }
        extras.sort();
        extras.dedup();

        let rest = caps["rest"].trim();

        if let Some(url_part) = rest.strip_prefix('@') {
            let (url, marker) = match url_part.split_once(" ;") {
                Some((url, marker)) => (url.trim(), Some(marker)),
                None => (url_part.trim(), None),
            };
            if url.is_empty() || !url.contains("://") {
                return Err(invalid("direct reference must be a URL"));
            }
            return Ok(Self {
                name,
                extras,
                specifiers: SpecifierSet::default(),
                marker: parse_marker(marker).map_err(|r| invalid(&r))?,
                url: Some(url.to_string()),
                hashes,
            });
        }

        let (specs, marker) = match rest.split_once(';') {
            Some((specs, marker)) => (specs, Some(marker)),
            None => (rest, None),
        };

        Ok(Self {
            name,
            extras,
            specifiers: SpecifierSet::parse(specs)?,
            marker: parse_marker(marker).map_err(|r| invalid(&r))?,
            url: None,
            hashes,
        })
    }

    /// Name with extras and specifiers, without marker or hashes
    pub fn constraint(&self) -> String {
        let mut out = self.name.clone();
        if !self.extras.is_empty() {
            out.push_str(&format!("[{}]", self.extras.join(",")));
        }
        match &self.url {
            Some(url) => out.push_str(&format!(" @ {}", url)),
            None => out.push_str(&self.specifiers.to_string()),
        }
        out
    }
}

fn parse_marker(marker: Option<&str>) -> Result<Option<String>, String> {
    match marker.map(str::trim) {
        None => Ok(None),
        Some("") => Err("empty environment marker".to_string()),
        Some(m) => Ok(Some(m.to_string())),
    }
}

fn split_hashes(line: &str) -> Result<(&str, Vec<String>), String> {
    let Some(start) = line.find(" --") else {
        return Ok((line, Vec::new()));
    };
    let (body, options) = line.split_at(start);
    let mut hashes = Vec::new();
    let mut tokens = options.split_whitespace();
    while let Some(token) = tokens.next() {
        let value = match token.strip_prefix("--hash") {
            Some(v) if v.starts_with('=') => v[1..].to_string(),
            Some("") => tokens
                .next()
                .ok_or_else(|| "--hash needs a value".to_string())?
                .to_string(),
            _ => return Err(format!("unsupported per-requirement option '{}'", token)),
        };
        if !value.contains(':') {
            return Err(format!("invalid hash '{}'", value));
        }
        hashes.push(value);
    }
    Ok((body, hashes))
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.constraint())?;
        if let Some(marker) = &self.marker {
            if self.url.is_some() {
                write!(f, " ; {}", marker)?;
            } else {
                write!(f, "; {}", marker)?;
            }
        }
        for hash in &self.hashes {
            write!(f, " --hash={}", hash)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        pinned = { "fastapi==0.100.0", "fastapi==0.100.0" },
        spaced = { "  FastAPI  ==  0.100.0 ", "fastapi==0.100.0" },
        underscores = { "Typing_Extensions>=4.5", "typing-extensions>=4.5" },
        extras = { "uvicorn[Standard, watchfiles]>=0.22", "uvicorn[standard,watchfiles]>=0.22" },
        marker = { "uvloop; sys_platform != 'win32'", "uvloop; sys_platform != 'win32'" },
        bare = { "httpx", "httpx" },
        url = { "pkg @ https://example.com/pkg-1.0.tar.gz", "pkg @ https://example.com/pkg-1.0.tar.gz" },
        hashes = { "six==1.16.0 --hash=sha256:abc --hash sha256:def", "six==1.16.0 --hash=sha256:abc --hash=sha256:def" },
    )]
    fn test_canonical_rendering(input: &str, expected: &str) {
        assert_eq!(Requirement::parse(input).unwrap().to_string(), expected);
    }

    #[parameterized(
        no_name = { "==1.0" },
        bad_spec = { "fastapi=0.100.0" },
        empty_marker = { "fastapi;" },
        url_without_scheme = { "pkg @ ./local" },
        unknown_option = { "fastapi --install-option=x" },
        bad_extra = { "pkg[a b]" },
    )]
    fn test_invalid(input: &str) {
        assert!(Requirement::parse(input).is_err());
    }

    #[test]
    fn test_fields() {
        let req = Requirement::parse("Uvicorn[standard]>=0.22,<1 ; python_version >= '3.8'").unwrap();
        assert_eq!(req.name, "uvicorn");
        assert_eq!(req.extras, vec!["standard".to_string()]);
        assert_eq!(req.specifiers.0.len(), 2);
        assert_eq!(req.marker.as_deref(), Some("python_version >= '3.8'"));
        assert_eq!(req.constraint(), "uvicorn[standard]>=0.22,<1");
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Foo.Bar__baz"), "foo-bar-baz");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
    }
}
