//! Recipient name resolution.
//!
//! Owner and manager fields on templates are free-text names typed by
//! humans; delivery needs stable directory identifiers. `resolve` maps
//! names to users with a deterministic priority order:
//!
//!   1. exact full-name match (case/whitespace-insensitive)
//!   2. first-initial form ("J. Nguyen" ↔ "John Nguyen")
//!   3. email local part ("jnguyen", "john.nguyen")
//!
//! Unresolved names are reported, never fatal: alerts still go to the
//! names that did resolve.

use opspulse_store::DirectoryUser;

/// Outcome of resolving a batch of names.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// (original name, directory user id), input order, deduplicated by id.
    pub resolved: Vec<(String, String)>,
    /// Names no heuristic matched.
    pub unresolved: Vec<String>,
}

impl Resolution {
    /// Just the user ids, in order.
    pub fn ids(&self) -> Vec<String> {
        self.resolved.iter().map(|(_, id)| id.clone()).collect()
    }
}

/// Lowercase and collapse internal whitespace.
fn normalize(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip spaces, dots and quotes entirely — the form email local parts
/// are compared in.
fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '.' && *c != '\'' && *c != '"')
        .collect::<String>()
        .to_lowercase()
}

/// Token-wise match where a single-letter token (optional dot) matches
/// any token with the same initial: "j. nguyen" vs "john nguyen".
fn initial_match(name: &str, full_name: &str) -> bool {
    let a: Vec<&str> = name.split_whitespace().collect();
    let b: Vec<&str> = full_name.split_whitespace().collect();
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    let mut any_initial = false;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = x.trim_end_matches('.').to_lowercase();
        let y = y.trim_end_matches('.').to_lowercase();
        if x == y {
            continue;
        }
        let (short, long) = if x.len() == 1 { (&x, &y) } else if y.len() == 1 { (&y, &x) } else {
            return false;
        };
        if !long.starts_with(short.as_str()) {
            return false;
        }
        any_initial = true;
    }
    any_initial
}

fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or("")
}

/// Resolve one name against the directory. Directory order breaks ties,
/// so the outcome is deterministic for a given snapshot.
fn resolve_one<'a>(name: &str, directory: &'a [DirectoryUser]) -> Option<&'a DirectoryUser> {
    let wanted = normalize(name);
    if wanted.is_empty() {
        return None;
    }
    if let Some(u) = directory.iter().find(|u| normalize(&u.full_name) == wanted) {
        return Some(u);
    }
    if let Some(u) = directory.iter().find(|u| initial_match(&wanted, &normalize(&u.full_name))) {
        return Some(u);
    }
    let squashed = squash(name);
    directory
        .iter()
        .find(|u| !squashed.is_empty() && squash(email_local_part(&u.email)) == squashed)
}

/// Resolve a batch of names. Duplicate hits on the same user collapse to
/// the first occurrence.
pub fn resolve(names: &[String], directory: &[DirectoryUser]) -> Resolution {
    let mut out = Resolution::default();
    for name in names {
        if name.trim().is_empty() {
            continue;
        }
        match resolve_one(name, directory) {
            Some(user) => {
                if !out.resolved.iter().any(|(_, id)| id == &user.id) {
                    out.resolved.push((name.clone(), user.id.clone()));
                }
            }
            None => out.unresolved.push(name.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> Vec<DirectoryUser> {
        vec![
            DirectoryUser {
                id: "u1".into(),
                full_name: "John Nguyen".into(),
                email: "john.nguyen@example.com".into(),
            },
            DirectoryUser {
                id: "u2".into(),
                full_name: "Alice Tran".into(),
                email: "atran@example.com".into(),
            },
            DirectoryUser {
                id: "u3".into(),
                full_name: "Jane Ngo".into(),
                email: "jngo@example.com".into(),
            },
        ]
    }

    #[test]
    fn test_exact_match_case_space_insensitive() {
        let r = resolve(&["  john   NGUYEN ".into()], &directory());
        assert_eq!(r.ids(), vec!["u1"]);
        assert!(r.unresolved.is_empty());
    }

    #[test]
    fn test_initial_fallback() {
        let r = resolve(&["J. Nguyen".into()], &directory());
        assert_eq!(r.ids(), vec!["u1"]);
        // Trailing-initial form works the same way.
        let r = resolve(&["Alice T".into()], &directory());
        assert_eq!(r.ids(), vec!["u2"]);
    }

    #[test]
    fn test_email_local_part_fallback() {
        let r = resolve(&["john.nguyen".into()], &directory());
        assert_eq!(r.ids(), vec!["u1"]);
        let r = resolve(&["ATran".into()], &directory());
        assert_eq!(r.ids(), vec!["u2"]);
    }

    #[test]
    fn test_priority_order_exact_beats_email() {
        // A user whose full name matches exactly wins over a different
        // user whose email local part would also match.
        let dir = vec![
            DirectoryUser {
                id: "byname".into(),
                full_name: "JNgo".into(),
                email: "other@example.com".into(),
            },
            DirectoryUser {
                id: "byemail".into(),
                full_name: "Jane Ngo".into(),
                email: "jngo@example.com".into(),
            },
        ];
        let r = resolve(&["jngo".into()], &dir);
        assert_eq!(r.ids(), vec!["byname"]);
    }

    #[test]
    fn test_unresolved_does_not_block_resolved() {
        let r = resolve(&["Nobody Here".into(), "Alice Tran".into()], &directory());
        assert_eq!(r.ids(), vec!["u2"]);
        assert_eq!(r.unresolved, vec!["Nobody Here"]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let r = resolve(
            &["John Nguyen".into(), "j. nguyen".into(), "john.nguyen".into()],
            &directory(),
        );
        assert_eq!(r.ids(), vec!["u1"]);
    }
}
