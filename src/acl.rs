use crate::models::Identity;
use serde::{Deserialize, Serialize};

/// One Verdaccio-style `packages:` rule. This surface only ever reads, so a
/// rule carries the access principals alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRule {
    pub pattern: String,
    pub access: Vec<String>,
}

impl AccessRule {
    pub fn open(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            access: vec!["$all".to_string()],
        }
    }

    pub fn restricted(pattern: impl Into<String>, access: Vec<String>) -> Self {
        Self {
            pattern: pattern.into(),
            access,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Acl {
    rules: Vec<AccessRule>,
}

impl Acl {
    pub fn new(mut rules: Vec<AccessRule>) -> Self {
        if rules.is_empty() {
            rules.push(AccessRule::open("**"));
        }
        Self { rules }
    }

    pub fn default_open() -> Self {
        Self::new(vec![AccessRule::open("**")])
    }

    pub fn rule_for(&self, package: &str) -> Option<&AccessRule> {
        self.rules
            .iter()
            .find(|rule| pattern_matches(&rule.pattern, package))
            .or_else(|| self.rules.last())
    }

    pub fn can_access(&self, package: &str, identity: &Identity) -> bool {
        self.rule_for(package)
            .map(|rule| permits(&rule.access, identity))
            .unwrap_or(true)
    }
}

fn permits(principals: &[String], identity: &Identity) -> bool {
    if principals.is_empty() {
        return false;
    }

    principals.iter().any(|principal| match principal.as_str() {
        "$all" | "all" | "@all" => true,
        "$anonymous" | "@anonymous" => identity.is_anonymous(),
        "$authenticated" | "@authenticated" => !identity.is_anonymous(),
        other => {
            identity.name.as_deref() == Some(other)
                || identity.groups.iter().any(|group| group == other)
        }
    })
}

fn pattern_matches(pattern: &str, package: &str) -> bool {
    if pattern == "**" {
        return true;
    }

    wildcard_match(pattern, package)
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let starts_with_wild = pattern.starts_with('*');
    let ends_with_wild = pattern.ends_with('*');

    let mut position = 0usize;

    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }

        if index == 0 && !starts_with_wild {
            if !text[position..].starts_with(part) {
                return false;
            }
            position += part.len();
            continue;
        }

        if index == parts.len() - 1 && !ends_with_wild {
            if let Some(idx) = text[position..].rfind(part) {
                let absolute = position + idx;
                if absolute + part.len() != text.len() {
                    return false;
                }
                position = absolute + part.len();
                continue;
            }
            return false;
        }

        if let Some(idx) = text[position..].find(part) {
            position += idx + part.len();
        } else {
            return false;
        }
    }

    true
}
