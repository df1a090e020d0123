use common::chartinstall::{ConditionsStatus, InstallCondition};
use common::{CustomObject, Result, State};
use kube::runtime::events::{Event, EventType, Reporter};

/// Events about `obj` are reported under its component name
pub fn reporter_for<K: CustomObject>(obj: &K, instance: Option<String>) -> Result<Reporter> {
    Ok(Reporter {
        controller: obj.component_name()?,
        instance,
    })
}

#[must_use]
pub fn from_transition(from: State, to: State, cond: &InstallCondition) -> Event {
    Event {
        type_: match cond.status {
            ConditionsStatus::True => EventType::Normal,
            ConditionsStatus::False => EventType::Warning,
        },
        reason: cond.reason.clone(),
        note: Some(format!("{from} -> {to}: {}", cond.message)),
        action: format!("Transition to {to}"),
        secondary: None,
    }
}

#[must_use]
pub fn from_release(release: &str) -> Event {
    Event {
        type_: EventType::Normal,
        reason: "Uninstalled".to_string(),
        note: Some(format!("Release `{release}` uninstalled, releasing the resource")),
        action: "Removing finalizer".to_string(),
        secondary: None,
    }
}
