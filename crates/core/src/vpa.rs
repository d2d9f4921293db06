//! VerticalPodAutoscaler (`autoscaling.k8s.io/v1`), not shipped by k8s-openapi.

use k8s_openapi::api::autoscaling::v1::CrossVersionObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::creator::{wrap, Creator};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VerticalPodAutoscaler {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VerticalPodAutoscalerSpec,
    #[serde(default)]
    pub status: Option<serde_json::Value>,
}

custom_resource!(
    VerticalPodAutoscaler,
    group = "autoscaling.k8s.io",
    version = "v1",
    kind = "VerticalPodAutoscaler",
    plural = "verticalpodautoscalers",
    scope = k8s_openapi::NamespaceResourceScope
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerticalPodAutoscalerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<CrossVersionObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<PodUpdatePolicy>,
    /// Per-container policies, kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodUpdatePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<UpdateMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    Off,
    Initial,
    Recreate,
    Auto,
}

impl VerticalPodAutoscaler {
    pub fn update_mode(&self) -> Option<UpdateMode> {
        self.spec.update_policy.as_ref().and_then(|p| p.update_mode)
    }
}

/// Forces `spec.updatePolicy.updateMode` to `Off`, turning the autoscaler into
/// a recommender only. Errors from `inner` pass through untouched.
pub fn disable_autoscaling(inner: Creator<VerticalPodAutoscaler>) -> Creator<VerticalPodAutoscaler> {
    wrap(inner, |mut vpa: VerticalPodAutoscaler| {
        vpa.spec.update_policy.get_or_insert_with(PodUpdatePolicy::default).update_mode = Some(UpdateMode::Off);
        vpa
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CreatorError, NamedCreator};

    fn with_mode(mode: Option<UpdateMode>) -> NamedCreator<VerticalPodAutoscaler> {
        NamedCreator::new("apiserver", move |mut vpa: VerticalPodAutoscaler| {
            vpa.spec.target_ref = Some(CrossVersionObjectReference {
                api_version: Some("apps/v1".into()),
                kind: "Deployment".into(),
                name: "apiserver".into(),
            });
            vpa.spec.update_policy = mode.map(|m| PodUpdatePolicy { update_mode: Some(m), min_replicas: Some(2) });
            Ok(vpa)
        })
    }

    #[test]
    fn disable_forces_off_for_every_mode() {
        for mode in [None, Some(UpdateMode::Auto), Some(UpdateMode::Recreate), Some(UpdateMode::Initial), Some(UpdateMode::Off)] {
            let wrapped = with_mode(mode).map(disable_autoscaling);
            let vpa = wrapped.create(VerticalPodAutoscaler::default()).unwrap();
            assert_eq!(vpa.update_mode(), Some(UpdateMode::Off), "inner mode {:?}", mode);
            assert_eq!(vpa.spec.target_ref.as_ref().map(|t| t.name.as_str()), Some("apiserver"));
        }
        // Unrelated policy fields survive
        let vpa = with_mode(Some(UpdateMode::Auto)).map(disable_autoscaling).create(VerticalPodAutoscaler::default()).unwrap();
        assert_eq!(vpa.spec.update_policy.and_then(|p| p.min_replicas), Some(2));
    }

    #[test]
    fn disable_keeps_inner_error() {
        let failing: NamedCreator<VerticalPodAutoscaler> = NamedCreator::new("x", |_| Err(CreatorError::invalid("target", "missing")));
        let err = failing.map(disable_autoscaling).create(VerticalPodAutoscaler::default()).unwrap_err();
        assert!(matches!(err, CreatorError::Invalid { ref field, .. } if field == "target"), "{:?}", err);
    }

    #[test]
    fn serializes_with_type_meta() {
        let vpa = with_mode(Some(UpdateMode::Auto)).create(VerticalPodAutoscaler::default()).unwrap();
        let v = serde_json::to_value(&vpa).unwrap();
        assert_eq!(v["apiVersion"], "autoscaling.k8s.io/v1");
        assert_eq!(v["kind"], "VerticalPodAutoscaler");
        assert_eq!(v["spec"]["updatePolicy"]["updateMode"], "Auto");
        assert_eq!(v["spec"]["targetRef"]["kind"], "Deployment");
        assert!(v.get("status").is_none());

        let back: VerticalPodAutoscaler = serde_json::from_value(v).unwrap();
        assert_eq!(back, vpa);
    }
}
