//! Lecture de la description UPnP d'une caméra Sony.
//!
//! Le document `DmsRmtDesc.xml` publié par la caméra porte, en plus des champs
//! UPnP classiques, un bloc `av:X_ScalarWebAPI_DeviceInfo` qui liste les
//! services ScalarWebAPI et l'URL de leur endpoint.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;
use ureq::Agent;
use xmltree::{Element, XMLNode};

use crate::errors::{CameraError, Result};

pub const UPNP_DEVICE_NS: &str = "urn:schemas-upnp-org:device-1-0";
pub const SONY_AV_NS: &str = "urn:schemas-sony-com:av";

/// What the camera tells about itself in its device description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub api_version: String,
    /// Service type (`camera`, `system`, `avContent`, …) → action list URL.
    pub services: BTreeMap<String, String>,
}

impl DeviceDescriptor {
    pub fn service_url(&self, service_type: &str) -> Option<&str> {
        self.services.get(service_type).map(String::as_str)
    }

    pub fn service_types(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}

/// Downloads and parses the device description at `location`.
pub fn fetch_descriptor(location: &str) -> Result<DeviceDescriptor> {
    let agent: Agent = Agent::config_builder().build().into();
    fetch_descriptor_with(&agent, location)
}

pub fn fetch_descriptor_with(agent: &Agent, location: &str) -> Result<DeviceDescriptor> {
    debug!("Fetching device description at {}", location);

    let mut response = agent.get(location).call()?;
    let body = response.body_mut().read_to_string()?;

    let descriptor = parse_descriptor(&body)?;
    debug!(
        "Parsed description: name={} api_version={} services={:?}",
        descriptor.name, descriptor.api_version, descriptor.services
    );
    Ok(descriptor)
}

/// Parses a device description document.
///
/// Every node is looked up by namespace, so prefixes chosen by the device do
/// not matter. Any missing node is a [`CameraError::DescriptorParse`].
pub fn parse_descriptor(xml: &str) -> Result<DeviceDescriptor> {
    let root = Element::parse(xml.as_bytes())?;

    let device = child(&root, UPNP_DEVICE_NS, "device", "root/device")?;
    let name = child_text(device, UPNP_DEVICE_NS, "friendlyName", "device/friendlyName")?;

    let info = child(
        device,
        SONY_AV_NS,
        "X_ScalarWebAPI_DeviceInfo",
        "device/X_ScalarWebAPI_DeviceInfo",
    )?;
    let api_version = child_text(
        info,
        SONY_AV_NS,
        "X_ScalarWebAPI_Version",
        "X_ScalarWebAPI_DeviceInfo/X_ScalarWebAPI_Version",
    )?;
    let service_list = child(
        info,
        SONY_AV_NS,
        "X_ScalarWebAPI_ServiceList",
        "X_ScalarWebAPI_DeviceInfo/X_ScalarWebAPI_ServiceList",
    )?;

    let mut services = BTreeMap::new();
    for service in service_list.children.iter().filter_map(XMLNode::as_element) {
        let service_type = child_text(
            service,
            SONY_AV_NS,
            "X_ScalarWebAPI_ServiceType",
            "X_ScalarWebAPI_Service/X_ScalarWebAPI_ServiceType",
        )?;
        let action_url = child_text(
            service,
            SONY_AV_NS,
            "X_ScalarWebAPI_ActionList_URL",
            "X_ScalarWebAPI_Service/X_ScalarWebAPI_ActionList_URL",
        )?;
        services.insert(service_type, action_url);
    }

    Ok(DeviceDescriptor {
        name,
        api_version,
        services,
    })
}

fn child<'a>(parent: &'a Element, ns: &str, name: &str, path: &str) -> Result<&'a Element> {
    parent
        .children
        .iter()
        .find_map(|node| match node {
            XMLNode::Element(elem)
                if elem.name == name && elem.namespace.as_deref() == Some(ns) =>
            {
                Some(elem)
            }
            _ => None,
        })
        .ok_or_else(|| CameraError::descriptor_parse(path))
}

fn child_text(parent: &Element, ns: &str, name: &str, path: &str) -> Result<String> {
    child(parent, ns, name, path)?
        .get_text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CameraError::DescriptorParse(format!("{} has no text", path)))
}
