//! Semantics: the four-aspect contract (atomicity, consistency, persistency,
//! security) attached to every batch and propagated into messages sent to
//! server backends.
//!
//! Grounded on `original_source/lib/core/jsemantics.c` and
//! `original_source/include/core/jsemantics.h`: a semantics value starts
//! mutable, and freezes (becomes immutable) the moment it is shared via
//! [`Semantics::freeze`] — mirroring `j_semantics_ref` setting `immutable =
//! TRUE` on first ref. Further `set_*` calls after freezing are refused.

use std::sync::atomic::{AtomicBool, Ordering};

/// How atomically a batch's operations are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Atomicity {
    /// No atomicity guarantees beyond per-call semantics.
    #[default]
    None,
    /// Each operation is atomic individually.
    Operation,
    /// The whole batch is atomic.
    Batch,
}

/// How consistent a batch's effects must be, and hence how it executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    /// Flush the eventual cache, then execute synchronously.
    #[default]
    Immediate,
    /// Defer execution until the batch's last reference is dropped.
    Session,
    /// Attempt to enqueue into the operation cache; fall back to immediate.
    Eventual,
}

/// How durable a write must be before the framework reports success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Persistency {
    /// No particular persistency is required.
    None,
    /// Durable once it has crossed the network to a server.
    #[default]
    Network,
    /// Durable on stable storage (server issues an fsync-equivalent).
    Storage,
}

/// Whether requests carry and enforce opaque credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    #[default]
    None,
    Strict,
}

/// Safety class carried on the wire (spec.md §4.3, §6): governs whether a
/// reply is required and whether the server issues a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Safety {
    None,
    Network,
    Storage,
}

impl From<Persistency> for Safety {
    fn from(p: Persistency) -> Self {
        match p {
            Persistency::None => Safety::None,
            Persistency::Network => Safety::Network,
            Persistency::Storage => Safety::Storage,
        }
    }
}

impl Safety {
    /// A message with this safety class requires a reply (ack or payload).
    /// Read operations always require a reply regardless of safety; that
    /// policy lives with the call site, not here.
    pub fn requires_reply(self) -> bool {
        !matches!(self, Safety::None)
    }
}

/// Named templates, mirroring `JSemanticsTemplate` in the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Default,
    Posix,
    TemporaryLocal,
}

/// A semantics value: four aspects plus a freeze flag.
///
/// `freeze` is irreversible. Once frozen, `set_*` calls return `false`
/// instead of panicking — applications that ignore the return value keep
/// running with the previous value, same as the source's `g_return_*`
/// early-return pattern.
#[derive(Debug)]
pub struct Semantics {
    atomicity: std::sync::Mutex<Atomicity>,
    consistency: std::sync::Mutex<Consistency>,
    persistency: std::sync::Mutex<Persistency>,
    security: std::sync::Mutex<Security>,
    frozen: AtomicBool,
}

impl Semantics {
    pub fn new(template: Template) -> Self {
        let (atomicity, consistency, persistency, security) = match template {
            Template::Default => (Atomicity::None, Consistency::Immediate, Persistency::Network, Security::None),
            Template::Posix => (Atomicity::Operation, Consistency::Immediate, Persistency::Network, Security::Strict),
            Template::TemporaryLocal => (Atomicity::None, Consistency::Eventual, Persistency::Network, Security::None),
        };

        Self {
            atomicity: std::sync::Mutex::new(atomicity),
            consistency: std::sync::Mutex::new(consistency),
            persistency: std::sync::Mutex::new(persistency),
            security: std::sync::Mutex::new(security),
            frozen: AtomicBool::new(false),
        }
    }

    /// Parses `atomicity=...,consistency=...,persistency=...,security=...`
    /// overrides on top of a named template, as `j_semantics_new_from_string`
    /// does.
    pub fn from_str_overrides(template: Template, overrides: Option<&str>) -> anyhow::Result<Self> {
        let semantics = Self::new(template);

        let Some(overrides) = overrides else {
            return Ok(semantics);
        };

        for part in overrides.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };

            match key {
                "atomicity" => {
                    let v = match value {
                        "none" => Atomicity::None,
                        "operation" => Atomicity::Operation,
                        "batch" => Atomicity::Batch,
                        other => anyhow::bail!("unknown atomicity: {other}"),
                    };
                    semantics.set_atomicity(v);
                }
                "consistency" => {
                    let v = match value {
                        "immediate" => Consistency::Immediate,
                        "session" => Consistency::Session,
                        "eventual" => Consistency::Eventual,
                        other => anyhow::bail!("unknown consistency: {other}"),
                    };
                    semantics.set_consistency(v);
                }
                "persistency" => {
                    let v = match value {
                        "none" => Persistency::None,
                        "network" => Persistency::Network,
                        "storage" => Persistency::Storage,
                        other => anyhow::bail!("unknown persistency: {other}"),
                    };
                    semantics.set_persistency(v);
                }
                "security" => {
                    let v = match value {
                        "none" => Security::None,
                        "strict" => Security::Strict,
                        other => anyhow::bail!("unknown security: {other}"),
                    };
                    semantics.set_security(v);
                }
                other => anyhow::bail!("unknown semantics aspect: {other}"),
            }
        }

        Ok(semantics)
    }

    fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn set_atomicity(&self, v: Atomicity) -> bool {
        if self.is_frozen() {
            return false;
        }
        *self.atomicity.lock().unwrap() = v;
        true
    }

    pub fn set_consistency(&self, v: Consistency) -> bool {
        if self.is_frozen() {
            return false;
        }
        *self.consistency.lock().unwrap() = v;
        true
    }

    pub fn set_persistency(&self, v: Persistency) -> bool {
        if self.is_frozen() {
            return false;
        }
        *self.persistency.lock().unwrap() = v;
        true
    }

    pub fn set_security(&self, v: Security) -> bool {
        if self.is_frozen() {
            return false;
        }
        *self.security.lock().unwrap() = v;
        true
    }

    pub fn atomicity(&self) -> Atomicity {
        *self.atomicity.lock().unwrap()
    }

    pub fn consistency(&self) -> Consistency {
        *self.consistency.lock().unwrap()
    }

    pub fn persistency(&self) -> Persistency {
        *self.persistency.lock().unwrap()
    }

    pub fn security(&self) -> Security {
        *self.security.lock().unwrap()
    }

    pub fn safety(&self) -> Safety {
        self.persistency().into()
    }

    /// Freezes the semantics. Idempotent. Called the moment a batch (or a
    /// message) takes a shared reference to it.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_matches_source_defaults() {
        let s = Semantics::new(Template::Default);
        assert_eq!(s.atomicity(), Atomicity::None);
        assert_eq!(s.consistency(), Consistency::Immediate);
        assert_eq!(s.persistency(), Persistency::Network);
        assert_eq!(s.security(), Security::None);
    }

    #[test]
    fn posix_template_is_strict() {
        let s = Semantics::new(Template::Posix);
        assert_eq!(s.atomicity(), Atomicity::Operation);
        assert_eq!(s.security(), Security::Strict);
    }

    #[test]
    fn freeze_blocks_further_mutation() {
        let s = Semantics::new(Template::Default);
        s.freeze();
        assert!(!s.set_consistency(Consistency::Eventual));
        assert_eq!(s.consistency(), Consistency::Immediate);
    }

    #[test]
    fn from_str_overrides_template() {
        let s = Semantics::from_str_overrides(Template::Default, Some("consistency=eventual,security=strict")).unwrap();
        assert_eq!(s.consistency(), Consistency::Eventual);
        assert_eq!(s.security(), Security::Strict);
    }

    #[test]
    fn safety_none_does_not_require_reply() {
        assert!(!Safety::None.requires_reply());
        assert!(Safety::Network.requires_reply());
        assert!(Safety::Storage.requires_reply());
    }
}
