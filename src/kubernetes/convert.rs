// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Mapping between `DynamicObject` and the engine's resource record.
//!
//! `spec` and `status` get their own fields. Everything else at the top level
//! of the object body (a ConfigMap's `data`, for one) is kept in
//! `Resource::extra` and written back untouched.

use crate::error::Result;
use crate::types::{ObjectKey, OwnerReference, Resource, ResourceKind, Status};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    ObjectMeta, OwnerReference as KubeOwnerReference, Time,
};
use kube::api::{ApiResource, DynamicObject};
use kube::core::{GroupVersionKind, TypeMeta};
use serde_json::{Map, Value};

pub fn api_resource(kind: &ResourceKind) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind))
}

pub fn to_resource(kind: &ResourceKind, object: DynamicObject) -> Result<Resource> {
    let DynamicObject { metadata, data, .. } = object;
    let mut extra = match data {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let status: Status = match extra.remove("status") {
        Some(Value::Null) | None => Status::default(),
        Some(status) => serde_json::from_value(status)?,
    };
    let spec = extra.remove("spec").unwrap_or(Value::Null);

    Ok(Resource {
        kind: kind.clone(),
        key: ObjectKey::new(
            metadata.namespace.unwrap_or_default(),
            metadata.name.unwrap_or_default(),
        ),
        uid: metadata.uid.unwrap_or_default(),
        generation: metadata.generation.unwrap_or_default(),
        resource_version: metadata.resource_version.unwrap_or_default(),
        deletion_timestamp: metadata.deletion_timestamp.map(|Time(t)| t),
        finalizers: metadata.finalizers.unwrap_or_default(),
        owner_references: metadata
            .owner_references
            .unwrap_or_default()
            .into_iter()
            .map(|o| OwnerReference {
                api_version: o.api_version,
                kind: o.kind,
                name: o.name,
                uid: o.uid,
                controller: o.controller,
            })
            .collect(),
        labels: metadata.labels.unwrap_or_default(),
        annotations: metadata.annotations.unwrap_or_default(),
        spec,
        status,
        extra,
    })
}

pub fn to_dynamic(object: &Resource) -> Result<DynamicObject> {
    let mut data = object.extra.clone();
    if !object.spec.is_null() {
        data.insert("spec".to_string(), object.spec.clone());
    }
    // Kinds without a status must not be sent an empty one.
    if object.status != Status::default() {
        data.insert("status".to_string(), serde_json::to_value(&object.status)?);
    }

    Ok(DynamicObject {
        types: Some(TypeMeta {
            api_version: object.kind.api_version(),
            kind: object.kind.kind.clone(),
        }),
        metadata: ObjectMeta {
            name: Some(object.key.name.clone()),
            namespace: object.key.is_namespaced().then(|| object.key.namespace.clone()),
            uid: (!object.uid.is_empty()).then(|| object.uid.clone()),
            resource_version: (!object.resource_version.is_empty())
                .then(|| object.resource_version.clone()),
            generation: (object.generation > 0).then_some(object.generation),
            deletion_timestamp: object.deletion_timestamp.map(Time),
            finalizers: (!object.finalizers.is_empty()).then(|| object.finalizers.clone()),
            owner_references: (!object.owner_references.is_empty()).then(|| {
                object
                    .owner_references
                    .iter()
                    .map(|o| KubeOwnerReference {
                        api_version: o.api_version.clone(),
                        kind: o.kind.clone(),
                        name: o.name.clone(),
                        uid: o.uid.clone(),
                        controller: o.controller,
                        ..KubeOwnerReference::default()
                    })
                    .collect()
            }),
            labels: (!object.labels.is_empty()).then(|| object.labels.clone()),
            annotations: (!object.annotations.is_empty()).then(|| object.annotations.clone()),
            ..ObjectMeta::default()
        },
        data: Value::Object(data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{make_widget_kind, widget_json};
    use crate::types::{set_condition, Condition};
    use serde_json::json;

    fn make_dynamic() -> DynamicObject {
        serde_json::from_str(&widget_json("a", "42", &["example.com/cleanup"])).unwrap()
    }

    #[test]
    fn test_api_resource_guesses_plural() {
        let ar = api_resource(&make_widget_kind());
        assert_eq!(ar.plural, "widgets");
        assert_eq!(ar.api_version, "example.com/v1");
    }

    #[test]
    fn test_dynamic_object_to_resource() {
        let resource = to_resource(&make_widget_kind(), make_dynamic()).unwrap();

        assert_eq!(resource.key, ObjectKey::new("default", "a"));
        assert_eq!(resource.uid, "uid-a");
        assert_eq!(resource.generation, 1);
        assert_eq!(resource.resource_version, "42");
        assert_eq!(resource.finalizers, vec!["example.com/cleanup".to_string()]);
        assert_eq!(resource.spec, json!({ "size": 1 }));
        assert_eq!(resource.status, Status::default());
        assert!(!resource.is_deleting());
    }

    #[test]
    fn test_resource_to_dynamic_keeps_version_and_status() {
        let mut resource = to_resource(&make_widget_kind(), make_dynamic()).unwrap();
        set_condition(
            &mut resource.status.conditions,
            Condition::new("Ready", true, "Reconciled", "ok"),
        );
        resource.status.observed_generation = Some(1);

        let object = to_dynamic(&resource).unwrap();

        assert_eq!(object.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(object.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(object.metadata.labels, None);
        assert_eq!(object.data["spec"], json!({ "size": 1 }));
        assert_eq!(object.data["status"]["observedGeneration"], json!(1));
        assert_eq!(object.data["status"]["conditions"][0]["type"], json!("Ready"));
        assert_eq!(to_resource(&make_widget_kind(), object).unwrap(), resource);
    }

    #[test]
    fn test_other_top_level_fields_survive_round_trip() {
        let config_map: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "settings", "namespace": "default", "resourceVersion": "9" },
            "data": { "key": "precious" },
            "immutable": false
        }))
        .unwrap();
        let kind = ResourceKind::new("", "v1", "ConfigMap");

        let resource = to_resource(&kind, config_map).unwrap();
        assert_eq!(resource.spec, Value::Null);
        assert_eq!(resource.extra["data"], json!({ "key": "precious" }));

        let object = to_dynamic(&resource).unwrap();
        assert_eq!(object.data["data"], json!({ "key": "precious" }));
        assert_eq!(object.data["immutable"], json!(false));
        assert!(object.data.get("status").is_none());
        assert!(object.data.get("spec").is_none());
    }
}
