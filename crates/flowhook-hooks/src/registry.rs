//! Hook Registry — per-event binding lists contributed by loaded addons.
//!
//! Dispatch reads far outnumber writes, so each event's list is an immutable
//! `Arc<[..]>` snapshot. Registration builds a new list and swaps it in under
//! a short write lock; a dispatch already holding the old snapshot never sees
//! a half-updated list.

use std::sync::Arc;

use flowhook_core::{AddonDescriptor, Handler, HookEventType, HookMap};
use flowhook_rules::{ConditionRule, RuleParseError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// One registered hook.
#[derive(Debug)]
pub struct HookBinding {
    pub addon: Arc<AddonDescriptor>,
    pub event: HookEventType,
    pub rule: ConditionRule,
    pub handler: Handler,
    /// Registry-wide registration sequence.
    pub sequence: u64,
}

impl HookBinding {
    fn sort_key(&self) -> (i32, &str, u64) {
        let (order, name) = self.addon.sort_key();
        (order, name, self.sequence)
    }
}

/// A condition string that failed to parse at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRule {
    pub addon: String,
    pub event: HookEventType,
    pub condition: String,
    pub error: String,
}

type BindingList = Arc<[Arc<HookBinding>]>;

struct Tables {
    lists: [BindingList; 2],
    next_sequence: u64,
}

/// Registry of hook bindings, sorted by (addon order, addon name, sequence).
pub struct HookRegistry {
    tables: RwLock<Tables>,
    rejected: Mutex<Vec<RejectedRule>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        let empty: BindingList = Arc::from(Vec::new());
        Self {
            tables: RwLock::new(Tables {
                lists: [empty.clone(), empty],
                next_sequence: 0,
            }),
            rejected: Mutex::new(Vec::new()),
        }
    }

    /// Register one hook.
    ///
    /// A condition that fails to parse is logged here, once, and recorded in
    /// [`rejected`](Self::rejected). Nothing is registered for it, so it can
    /// never match a flow.
    pub fn register(
        &self,
        addon: &Arc<AddonDescriptor>,
        event: HookEventType,
        condition: &str,
        handler: Handler,
    ) -> Result<(), RuleParseError> {
        let rule = self.parse_rule(addon, event, condition)?;

        let mut tables = self.tables.write();
        let binding = Arc::new(HookBinding {
            addon: addon.clone(),
            event,
            rule,
            handler,
            sequence: tables.next_sequence,
        });
        tables.next_sequence += 1;

        let current = &tables.lists[event.index()];
        let mut next: Vec<Arc<HookBinding>> = current.iter().cloned().collect();
        let pos = next.partition_point(|b| b.sort_key() <= binding.sort_key());
        next.insert(pos, binding);
        tables.lists[event.index()] = next.into();

        tracing::debug!(addon = %addon.name, event = %event, rule = condition, "Hook registered");
        Ok(())
    }

    fn parse_rule(
        &self,
        addon: &AddonDescriptor,
        event: HookEventType,
        condition: &str,
    ) -> Result<ConditionRule, RuleParseError> {
        ConditionRule::parse(condition).inspect_err(|e| {
            tracing::warn!(
                addon = %addon.name,
                event = %event,
                rule = condition,
                "Rejected hook rule: {e}"
            );
            self.rejected.lock().push(RejectedRule {
                addon: addon.name.clone(),
                event,
                condition: condition.to_string(),
                error: e.to_string(),
            });
        })
    }

    /// Swap in the complete hook set of an addon, replacing whatever it had
    /// registered before. Returns how many hooks were accepted.
    ///
    /// Every rule is parsed before the tables are touched, and each event
    /// list is swapped exactly once under a single write lock, so a dispatch
    /// sees either the old hook set or the new one.
    pub fn replace_addon(&self, addon: &Arc<AddonDescriptor>, hooks: HookMap) -> usize {
        self.rejected.lock().retain(|r| r.addon != addon.name);

        let mut parsed: Vec<(HookEventType, ConditionRule, Handler)> = Vec::new();
        for (event, specs) in hooks {
            for spec in specs {
                if let Ok(rule) = self.parse_rule(addon, event, &spec.condition) {
                    parsed.push((event, rule, spec.handler));
                }
            }
        }
        let accepted = parsed.len();

        let mut tables = self.tables.write();
        let mut next: [Vec<Arc<HookBinding>>; 2] = [Vec::new(), Vec::new()];
        for (list, current) in next.iter_mut().zip(tables.lists.iter()) {
            list.extend(current.iter().filter(|b| b.addon.name != addon.name).cloned());
        }
        let removed = tables.lists.iter().map(|l| l.len()).sum::<usize>()
            - next.iter().map(Vec::len).sum::<usize>();
        for (event, rule, handler) in parsed {
            let sequence = tables.next_sequence;
            tables.next_sequence += 1;
            next[event.index()].push(Arc::new(HookBinding {
                addon: addon.clone(),
                event,
                rule,
                handler,
                sequence,
            }));
        }
        for (slot, mut list) in tables.lists.iter_mut().zip(next) {
            list.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
            *slot = list.into();
        }
        drop(tables);

        tracing::debug!(addon = %addon.name, accepted, removed, "Hooks replaced");
        accepted
    }

    /// Remove every binding owned by `addon`. Returns how many were removed.
    pub fn unregister(&self, addon: &str) -> usize {
        let mut removed = 0;
        {
            let mut tables = self.tables.write();
            for list in tables.lists.iter_mut() {
                let kept: Vec<Arc<HookBinding>> = list
                    .iter()
                    .filter(|b| b.addon.name != addon)
                    .cloned()
                    .collect();
                removed += list.len() - kept.len();
                *list = kept.into();
            }
        }
        self.rejected.lock().retain(|r| r.addon != addon);
        if removed > 0 {
            tracing::debug!(addon, removed, "Hooks unregistered");
        }
        removed
    }

    /// Current snapshot of the bindings for `event`, in dispatch order.
    pub fn bindings(&self, event: HookEventType) -> Arc<[Arc<HookBinding>]> {
        self.tables.read().lists[event.index()].clone()
    }

    /// Number of bindings owned by `addon`, across all events.
    pub fn count_for(&self, addon: &str) -> usize {
        let tables = self.tables.read();
        tables
            .lists
            .iter()
            .map(|l| l.iter().filter(|b| b.addon.name == addon).count())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.tables.read().lists.iter().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Conditions rejected at registration.
    pub fn rejected(&self) -> Vec<RejectedRule> {
        self.rejected.lock().clone()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
