// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! IoT-Hub-style telemetry topic builder, an alternate topic convention to
//! the `{modelId}/{senderId}` template `receiver`/`sender` use.
//!
//! Grounded in `az_iot_hub_telemetry.h` and the PnP telemetry topic tests:
//! the base topic is `devices/{device_id}[/modules/{module_id}]/messages/events/`,
//! optionally followed by the PnP system properties `%24.ifname` (component
//! name) and `%24.ct` (content type), joined with `&` and appended directly
//! (no leading `?`, unlike the hub client's generic custom-property bag).

/// Options for [`build_telemetry_topic`]. All fields are optional; the base
/// topic alone is `devices/{device_id}/messages/events/`.
#[derive(Debug, Clone, Default)]
pub struct TelemetryTopicOptions {
    /// Module ID, if publishing as a module identity rather than the device itself.
    pub module_id: Option<String>,
    /// PnP component name, written as the `%24.ifname` system property.
    pub component_name: Option<String>,
    /// Content type, written as the `%24.ct` system property.
    pub content_type: Option<String>,
}

/// Build the publish topic for a telemetry message, IoT-Hub style.
#[must_use]
pub fn build_telemetry_topic(device_id: &str, options: &TelemetryTopicOptions) -> String {
    let mut topic = format!("devices/{device_id}/");
    if let Some(module_id) = &options.module_id {
        topic.push_str("modules/");
        topic.push_str(module_id);
        topic.push('/');
    }
    topic.push_str("messages/events/");

    let mut system_properties = Vec::new();
    if let Some(component_name) = &options.component_name {
        system_properties.push(format!("%24.ifname={component_name}"));
    }
    if let Some(content_type) = &options.content_type {
        system_properties.push(format!("%24.ct={content_type}"));
    }
    if !system_properties.is_empty() {
        topic.push_str(&system_properties.join("&"));
    }
    topic
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_topic_with_no_options() {
        assert_eq!(
            build_telemetry_topic("my_device", &TelemetryTopicOptions::default()),
            "devices/my_device/messages/events/"
        );
    }

    #[test]
    fn component_name_and_content_type_are_appended_in_order() {
        let options = TelemetryTopicOptions {
            component_name: Some("my_component_name".to_string()),
            content_type: Some("my_content_type".to_string()),
            ..Default::default()
        };
        assert_eq!(
            build_telemetry_topic("my_device", &options),
            "devices/my_device/messages/events/%24.ifname=my_component_name&%24.ct=my_content_type"
        );
    }

    #[test]
    fn component_name_alone_has_no_trailing_ampersand() {
        let options = TelemetryTopicOptions {
            component_name: Some("my_component_name".to_string()),
            ..Default::default()
        };
        assert_eq!(
            build_telemetry_topic("my_device", &options),
            "devices/my_device/messages/events/%24.ifname=my_component_name"
        );
    }

    #[test]
    fn module_id_is_inserted_before_messages_segment() {
        let options = TelemetryTopicOptions {
            module_id: Some("my_module_id".to_string()),
            ..Default::default()
        };
        assert_eq!(
            build_telemetry_topic("my_device", &options),
            "devices/my_device/modules/my_module_id/messages/events/"
        );
    }
}
