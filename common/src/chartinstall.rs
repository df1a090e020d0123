use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Describe a chart to install on the cluster
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "ChartInstall",
    status = "ChartInstallStatus",
    shortname = "chi",
    group = "charts.declarative.dev",
    version = "v1alpha1",
    namespaced
)]
#[kube(
    doc = "Custom resource representing a chart installation",
    printcolumn = r#"
    {"name":"chart",   "type":"string", "description":"Chart", "jsonPath":".spec.chartPath"},
    {"name":"release", "type":"string", "description":"Release", "jsonPath":".spec.releaseName"},
    {"name":"state",   "type":"string", "description":"State", "jsonPath":".status.state"},
    {"name":"last_updated", "type":"date", "description":"Last transition", "format": "date-time", "jsonPath":".status.conditions[-1:].lastTransitionTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ChartInstallSpec {
    /// Path or reference of the chart to install
    pub chart_path: String,
    /// Name of the release
    pub release_name: String,
    /// Comma separated key=value configuration flags
    #[serde(default)]
    pub chart_flags: String,
}

/// Lifecycle state of a `ChartInstall`
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug, JsonSchema, Default)]
pub enum State {
    #[default]
    #[serde(rename = "")]
    Empty,
    Processing,
    Ready,
    Error,
    Deleting,
}

impl State {
    pub fn is_empty(&self) -> bool {
        *self == State::Empty
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Empty => "Empty",
            State::Processing => "Processing",
            State::Ready => "Ready",
            State::Error => "Error",
            State::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug, JsonSchema, Default)]
pub enum ConditionsType {
    #[default]
    Processing,
    Ready,
    Error,
    Deleting,
}

#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Copy, Debug, JsonSchema, Default)]
pub enum ConditionsStatus {
    #[default]
    True,
    False,
}

/// Snapshot of what was handed to the installer
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstallItem {
    pub chart_path: String,
    pub release_name: String,
    #[serde(default)]
    pub chart_flags: String,
}

impl From<&ChartInstallSpec> for InstallItem {
    fn from(spec: &ChartInstallSpec) -> Self {
        InstallItem {
            chart_path: spec.chart_path.clone(),
            release_name: spec.release_name.clone(),
            chart_flags: spec.chart_flags.clone(),
        }
    }
}

/// InstallCondition records one state transition of the resource
#[derive(Serialize, Deserialize, Eq, PartialEq, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstallCondition {
    /// Type of the transition
    #[serde(rename = "type")]
    pub condition_type: ConditionsType,
    /// Status ("True" or "False") describe if the transition succeeded
    pub status: ConditionsStatus,
    /// Machine readable reason
    #[serde(default)]
    pub reason: String,
    /// Message contains human-readable message indicating details about condition
    #[serde(default)]
    pub message: String,
    /// LastTransitionTime is the time the condition was last observed
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Install information the transition was made with
    pub install_info: Option<InstallItem>,
}

impl InstallCondition {
    #[must_use]
    pub fn new(
        condition_type: ConditionsType,
        status: ConditionsStatus,
        reason: &str,
        message: &str,
        install_info: Option<InstallItem>,
    ) -> InstallCondition {
        InstallCondition {
            condition_type,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Some(Utc::now()),
            install_info,
        }
    }

    pub fn deleting() -> InstallCondition {
        InstallCondition::new(
            ConditionsType::Deleting,
            ConditionsStatus::True,
            "DeletionRequested",
            "Deletion requested, uninstalling",
            None,
        )
    }

    pub fn processing(item: InstallItem) -> InstallCondition {
        InstallCondition::new(
            ConditionsType::Processing,
            ConditionsStatus::True,
            "Processing",
            "Installation started",
            Some(item),
        )
    }

    pub fn retrying(item: InstallItem) -> InstallCondition {
        InstallCondition::new(
            ConditionsType::Processing,
            ConditionsStatus::True,
            "Retrying",
            "Retrying after a failed installation",
            Some(item),
        )
    }

    pub fn drifted(item: InstallItem) -> InstallCondition {
        InstallCondition::new(
            ConditionsType::Processing,
            ConditionsStatus::True,
            "Drifted",
            "Installed release is no longer consistent",
            Some(item),
        )
    }

    pub fn spec_changed(item: InstallItem) -> InstallCondition {
        InstallCondition::new(
            ConditionsType::Processing,
            ConditionsStatus::True,
            "SpecChanged",
            "Chart specification changed since the last install",
            Some(item),
        )
    }

    pub fn ready(item: InstallItem) -> InstallCondition {
        InstallCondition::new(
            ConditionsType::Ready,
            ConditionsStatus::True,
            "Installed",
            "Installed succesfully",
            Some(item),
        )
    }

    pub fn install_failed(message: &str, item: InstallItem) -> InstallCondition {
        InstallCondition::new(
            ConditionsType::Error,
            ConditionsStatus::False,
            "InstallFailed",
            message,
            Some(item),
        )
    }

    pub fn verify_failed(message: &str, item: InstallItem) -> InstallCondition {
        InstallCondition::new(
            ConditionsType::Error,
            ConditionsStatus::False,
            "VerifyFailed",
            message,
            Some(item),
        )
    }

    pub fn uninstall_failed(message: &str, item: InstallItem) -> InstallCondition {
        InstallCondition::new(
            ConditionsType::Error,
            ConditionsStatus::False,
            "UninstallFailed",
            message,
            Some(item),
        )
    }

    fn same_as(&self, other: &InstallCondition) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.install_info == other.install_info
    }
}

/// The status object of `ChartInstall`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartInstallStatus {
    /// Current state
    #[serde(default, skip_serializing_if = "State::is_empty")]
    pub state: State,
    /// Transition history, latest condition of each type
    #[serde(default)]
    pub conditions: Vec<InstallCondition>,
    /// Last install information that reached Ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<InstallItem>,
}

impl ChartInstallStatus {
    pub fn have_condition(&self, cond: &InstallCondition) -> bool {
        self.conditions.iter().any(|c| c.same_as(cond))
    }

    /// Record a condition, replacing the previous one of the same type.
    /// Returns false when an identical condition is already present.
    pub fn record(&mut self, cond: InstallCondition) -> bool {
        if self.have_condition(&cond) {
            return false;
        }
        self.conditions.retain(|c| c.condition_type != cond.condition_type);
        self.conditions.push(cond);
        true
    }

    pub fn last_condition(&self) -> Option<&InstallCondition> {
        self.conditions.last()
    }
}

impl ChartInstall {
    pub const COMPONENT: &'static str = "chart-install";
}
