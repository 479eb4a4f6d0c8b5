//! Device tree: devices, components, and compositions (spec.md §3).

use crate::model::data_item::DataItem;
use std::collections::HashMap;

/// A physical or logical sub-assembly reported as a leaf of a component's
/// composition list (e.g. a motor inside a `Linear` axis).
#[derive(Debug, Clone)]
pub struct Composition {
    /// Unique id within the device.
    pub id: String,
    /// The composition's type tag, e.g. `MOTOR`.
    pub composition_type: String,
    /// An optional human-readable name.
    pub name: Option<String>,
}

/// A node in a device's component tree.
#[derive(Debug, Clone)]
pub struct Component {
    /// Unique id within the agent.
    pub id: String,
    /// An optional human-readable name.
    pub name: Option<String>,
    /// An optional globally-unique identifier.
    pub uuid: Option<String>,
    /// The component's type tag, e.g. `Controller`, `Linear`, `Rotary`, `Path`.
    pub component_type: String,
    /// Child components, in declaration order.
    pub children: Vec<Component>,
    /// Data items owned directly by this component, in declaration order.
    pub data_items: Vec<DataItem>,
    /// Sub-assemblies reported under this component.
    pub compositions: Vec<Composition>,
    /// Free-form descriptive attributes (description text, manufacturer…).
    pub attributes: HashMap<String, String>,
}

impl Component {
    /// Creates an empty component of the given type and id.
    pub fn new(id: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            uuid: None,
            component_type: component_type.into(),
            children: Vec::new(),
            data_items: Vec::new(),
            compositions: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    /// Depth-first visit of this component and every descendant.
    pub fn each_component<'a>(&'a self, f: &mut impl FnMut(&'a Component)) {
        f(self);
        for child in &self.children {
            child.each_component(f);
        }
    }

    /// Depth-first mutable visit of this component and every descendant.
    pub fn each_component_mut(&mut self, f: &mut impl FnMut(&mut Component)) {
        f(self);
        for child in &mut self.children {
            child.each_component_mut(f);
        }
    }
}

/// A device: the root of a component tree (spec.md §3). The agent itself is
/// represented as a synthetic device of type `Agent` whose data items report
/// its own availability and asset events.
#[derive(Debug, Clone)]
pub struct Device {
    /// Unique id within the agent.
    pub id: String,
    /// An optional human-readable name.
    pub name: Option<String>,
    /// An optional globally-unique identifier.
    pub uuid: Option<String>,
    /// The device's type tag — `Device` for ordinary devices, `Agent` for
    /// the synthetic self-device.
    pub device_type: String,
    /// The root component tree.
    pub children: Vec<Component>,
    /// Data items owned directly by the device (not nested in a component).
    pub data_items: Vec<DataItem>,
    /// Free-form descriptive attributes.
    pub attributes: HashMap<String, String>,
}

impl Device {
    /// Creates an empty device with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            uuid: None,
            device_type: "Device".into(),
            children: Vec::new(),
            data_items: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    /// The synthetic per-agent device type tag.
    pub fn is_agent_device(&self) -> bool {
        self.device_type == "Agent"
    }

    /// Depth-first visit of every component in this device's tree
    /// (device-owned data items are visited via [`Device::each_data_item`]).
    pub fn each_component<'a>(&'a self, mut f: impl FnMut(&'a Component)) {
        for child in &self.children {
            child.each_component(&mut f);
        }
    }

    /// Depth-first visit of every data item owned by this device or any
    /// descendant component.
    pub fn each_data_item<'a>(&'a self, mut f: impl FnMut(&'a DataItem)) {
        for item in &self.data_items {
            f(item);
        }
        self.each_component(|component| {
            for item in &component.data_items {
                f(item);
            }
        });
    }

    /// Depth-first mutable visit of every data item owned by this device or
    /// any descendant component.
    pub fn each_data_item_mut(&mut self, mut f: impl FnMut(&mut DataItem)) {
        for item in &mut self.data_items {
            f(item);
        }
        for child in &mut self.children {
            child.each_component_mut(&mut |component| {
                for item in &mut component.data_items {
                    f(item);
                }
            });
        }
    }

    /// The chain of ancestor names from this device down to (but not
    /// including) the named component, used for topic path derivation.
    pub fn ancestor_names_to<'a>(&'a self, target_id: &str) -> Option<Vec<&'a str>> {
        let mut path = vec![self.name.as_deref().unwrap_or(self.id.as_str())];
        if find_component_path(&self.children, target_id, &mut path) {
            return Some(path);
        }
        path.truncate(1);
        None
    }
}

fn find_component_path<'a>(
    components: &'a [Component],
    target_id: &str,
    path: &mut Vec<&'a str>,
) -> bool {
    for component in components {
        path.push(component.name.as_deref().unwrap_or(component.id.as_str()));
        if component.id == target_id {
            return true;
        }
        if find_component_path(&component.children, target_id, path) {
            return true;
        }
        path.pop();
    }
    false
}
