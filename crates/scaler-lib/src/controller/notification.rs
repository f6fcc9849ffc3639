//! Alarm notification parsing
//!
//! Accepts a fan-out envelope (`Records[0].Sns.Message`), a bare alarm
//! state-change message, or a direct scaling trigger naming the target.

use crate::error::{ScalerError, ScalerResult};
use crate::models::{ScalingRequest, TargetConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Alarm,
    Ok,
    InsufficientData,
}

impl AlarmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Alarm => "ALARM",
            AlarmState::Ok => "OK",
            AlarmState::InsufficientData => "INSUFFICIENT_DATA",
        }
    }

    fn parse(value: &str) -> ScalerResult<Self> {
        match value {
            "ALARM" => Ok(AlarmState::Alarm),
            "OK" => Ok(AlarmState::Ok),
            "INSUFFICIENT_DATA" => Ok(AlarmState::InsufficientData),
            other => Err(ScalerError::Validation(format!(
                "unknown alarm state '{}'",
                other
            ))),
        }
    }
}

/// A parsed alarm notification
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlarmNotification {
    pub alarm_name: Option<String>,
    pub state: Option<AlarmState>,
    pub reason: Option<String>,
    pub metric_name: Option<String>,
    pub namespace: Option<String>,
    pub threshold: Option<f64>,
    pub cluster_name: Option<String>,
    pub service_name: Option<String>,
    pub container_name: Option<String>,
    pub family: Option<String>,
}

impl AlarmNotification {
    /// Direct triggers carry no state and always act
    pub fn should_scale(&self) -> bool {
        matches!(self.state, None | Some(AlarmState::Alarm))
    }

    /// True when the message names a cluster, service, container or
    /// family other than the configured target's
    pub fn retargets(&self, target: &TargetConfig) -> bool {
        let differs = |field: &Option<String>, configured: &str| {
            field.as_deref().is_some_and(|v| v != configured)
        };
        differs(&self.cluster_name, &target.cluster_name)
            || differs(&self.service_name, &target.service_name)
            || differs(&self.container_name, &target.container_name)
            || differs(&self.family, &target.family)
    }

    /// Build the controller input, with fields named in the notification
    /// taking precedence over the configured target.
    ///
    /// The configured alarm only watches the configured target, so a
    /// message that retargets the cycle must name its own alarm.
    pub fn to_request(&self, target: &TargetConfig, raw: &str) -> ScalerResult<ScalingRequest> {
        if self.alarm_name.is_none() && self.retargets(target) {
            return Err(ScalerError::Validation(format!(
                "trigger for another target must name its alarm (configured alarm '{}' watches {}/{})",
                target.alarm_name, target.cluster_name, target.service_name
            )));
        }

        let mut request = ScalingRequest::for_target(target, raw);
        if let Some(cluster) = &self.cluster_name {
            request.cluster_name = cluster.clone();
        }
        if let Some(service) = &self.service_name {
            request.service_name = service.clone();
        }
        if let Some(container) = &self.container_name {
            request.container_name = container.clone();
        }
        if let Some(family) = &self.family {
            request.family = family.clone();
        }
        if let Some(alarm) = &self.alarm_name {
            request.alarm_name = alarm.clone();
        }
        request.reason = self.reason.clone();
        Ok(request)
    }
}

/// Parse a raw notification payload.
///
/// Anything that is not a JSON object of a known shape is a
/// `Validation` error.
pub fn parse_notification(raw: &str) -> ScalerResult<AlarmNotification> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ScalerError::Validation(format!("notification is not valid JSON: {}", e)))?;

    let message = unwrap_fan_out(value)?;
    let Value::Object(fields) = &message else {
        return Err(ScalerError::Validation(
            "notification message must be a JSON object".into(),
        ));
    };

    let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_owned);

    let state = text("NewStateValue")
        .map(|s| AlarmState::parse(&s))
        .transpose()?;

    let trigger = fields.get("Trigger");
    let trigger_text = |key: &str| {
        trigger
            .and_then(|t| t.get(key))
            .and_then(Value::as_str)
            .map(str::to_owned)
    };

    let notification = AlarmNotification {
        alarm_name: text("AlarmName"),
        state,
        reason: text("NewStateReason").or_else(|| text("reason")),
        metric_name: trigger_text("MetricName"),
        namespace: trigger_text("Namespace"),
        threshold: trigger
            .and_then(|t| t.get("Threshold"))
            .and_then(Value::as_f64),
        cluster_name: text("clusterName"),
        service_name: text("serviceName"),
        container_name: text("containerName"),
        family: text("family"),
    };

    if notification.alarm_name.is_none()
        && notification.state.is_none()
        && notification.cluster_name.is_none()
        && notification.family.is_none()
    {
        return Err(ScalerError::Validation(
            "notification is neither an alarm message nor a scaling trigger".into(),
        ));
    }

    Ok(notification)
}

/// Peel `Records[0].Sns.Message`, whose message may itself be a JSON string
fn unwrap_fan_out(value: Value) -> ScalerResult<Value> {
    let Some(records) = value.get("Records") else {
        return Ok(value);
    };

    let message = records
        .get(0)
        .and_then(|r| r.get("Sns"))
        .and_then(|s| s.get("Message"))
        .ok_or_else(|| {
            ScalerError::Validation("fan-out envelope has no Records[0].Sns.Message".into())
        })?;

    match message {
        Value::String(inner) => serde_json::from_str(inner).map_err(|e| {
            ScalerError::Validation(format!("alarm message is not valid JSON: {}", e))
        }),
        other => Ok(other.clone()),
    }
}
