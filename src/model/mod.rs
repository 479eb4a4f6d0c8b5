//! C1 — Data Model: the device tree, data items, and their derived indices
//! (spec.md §3, §4.1).

pub mod data_item;
pub mod device;
pub mod units;

pub use data_item::{
    dispatch_key, observation_name_from_type, topic_path, Constraints, DataItem,
    DataItemCategory, DataItemId, DataItemIndex, Filter, Representation,
};
pub use device::{Component, Composition, Device};
pub use units::UnitConversion;

use crate::error::{AgentError, Result};
use std::collections::HashMap;

/// Maps a data item's old `id` to its new `id` across a model reload,
/// leaving buffered observations whose id has no entry marked orphan
/// (spec.md §4.1, §9 Open Question).
#[derive(Debug, Clone, Default)]
pub struct IdRemap {
    map: HashMap<DataItemId, DataItemId>,
}

impl IdRemap {
    /// Looks up the new id for an old one, if the data item survived reload.
    pub fn get(&self, old_id: &str) -> Option<&DataItemId> {
        self.map.get(old_id)
    }

    /// Registers an id mapping.
    pub fn insert(&mut self, old_id: impl Into<String>, new_id: impl Into<String>) {
        self.map.insert(old_id.into(), new_id.into());
    }
}

/// The loaded, indexed device model (spec.md §4.1).
///
/// Built once by [`DeviceModel::load`] from an externally-parsed device
/// tree (the XML parser itself is out of scope, per spec.md §1); every
/// lookup the rest of the core needs is O(1) via the indices computed here.
#[derive(Debug, Clone)]
pub struct DeviceModel {
    devices: Vec<Device>,
    device_by_uuid: HashMap<String, usize>,
    device_by_name: HashMap<String, usize>,
    data_item_index: HashMap<usize, DataItemIndex>,
    /// `data item id -> device index`, agent-wide.
    data_item_owner: HashMap<DataItemId, usize>,
}

impl DeviceModel {
    /// Loads a device tree, computing topic paths, dispatch keys, unit
    /// conversions, and the source/name/id multi-indices (spec.md §4.1).
    ///
    /// Fails atomically: on any validation error, no partial model is
    /// returned.
    pub fn load(mut devices: Vec<Device>) -> Result<Self> {
        let mut device_by_uuid = HashMap::new();
        let mut device_by_name = HashMap::new();
        let mut data_item_index: HashMap<usize, DataItemIndex> = HashMap::new();
        let mut data_item_owner = HashMap::new();

        for (idx, device) in devices.iter_mut().enumerate() {
            if let Some(uuid) = &device.uuid {
                device_by_uuid.insert(uuid.clone(), idx);
            }
            if let Some(name) = &device.name {
                device_by_name.insert(name.clone(), idx);
            }

            derive_device_items(device)?;

            let mut index = DataItemIndex::default();
            device.each_data_item(|item| {
                index.insert(item);
            });
            for item_id in collect_ids(device) {
                data_item_owner.insert(item_id, idx);
            }
            data_item_index.insert(idx, index);
        }

        Ok(Self {
            devices,
            device_by_uuid,
            device_by_name,
            data_item_index,
            data_item_owner,
        })
    }

    /// All devices in the model, including the synthetic `Agent` device.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Looks up a device by uuid or, failing that, by name.
    pub fn lookup_device(&self, key: &str) -> Option<&Device> {
        self.device_by_uuid
            .get(key)
            .or_else(|| self.device_by_name.get(key))
            .and_then(|&idx| self.devices.get(idx))
    }

    /// Looks up a data item on a specific device by `Source`, `name`, or
    /// `id`, in that order (spec.md §4.1).
    pub fn lookup_data_item(&self, device: &Device, key: &str) -> Option<&DataItem> {
        let idx = self.device_index(device)?;
        let index = self.data_item_index.get(&idx)?;
        let id = index.resolve(key)?;
        find_data_item(device, id)
    }

    /// Looks up a data item anywhere in the model by its agent-wide id.
    pub fn lookup_data_item_by_id(&self, id: &str) -> Option<&DataItem> {
        let &device_idx = self.data_item_owner.get(id)?;
        let device = self.devices.get(device_idx)?;
        find_data_item(device, id)
    }

    /// Enumerates every data item in the model, across every device.
    pub fn each_data_item<'a>(&'a self, mut f: impl FnMut(&'a DataItem)) {
        for device in &self.devices {
            device.each_data_item(|item| f(item));
        }
    }

    fn device_index(&self, device: &Device) -> Option<usize> {
        self.devices.iter().position(|d| d.id == device.id)
    }

    /// Compares this model against a freshly-loaded replacement, producing
    /// the new model and an [`IdRemap`] from surviving data item ids to
    /// themselves or their reassigned replacement (spec.md §4.1 `reload`).
    ///
    /// Data items are matched across reload by `(device uuid-or-name,
    /// data item name-or-source)`; anything that doesn't match has no remap
    /// entry and buffered observations referencing it become orphans.
    pub fn reload(&self, new_devices: Vec<Device>) -> Result<(DeviceModel, IdRemap)> {
        let new_model = DeviceModel::load(new_devices)
            .map_err(|e| AgentError::ModelLoad(format!("new model failed validation: {e}")))?;

        let mut remap = IdRemap::default();
        for old_device in &self.devices {
            let matched_new = old_device
                .uuid
                .as_deref()
                .and_then(|uuid| new_model.lookup_device(uuid))
                .or_else(|| {
                    old_device
                        .name
                        .as_deref()
                        .and_then(|name| new_model.lookup_device(name))
                });
            let Some(new_device) = matched_new else {
                continue;
            };

            old_device.each_data_item(|old_item| {
                let matched = old_item
                    .source
                    .as_deref()
                    .and_then(|key| new_model.lookup_data_item(new_device, key))
                    .or_else(|| {
                        old_item
                            .name
                            .as_deref()
                            .and_then(|key| new_model.lookup_data_item(new_device, key))
                    })
                    .or_else(|| new_model.lookup_data_item(new_device, &old_item.id));
                if let Some(new_item) = matched {
                    remap.insert(old_item.id.clone(), new_item.id.clone());
                }
            });
        }

        Ok((new_model, remap))
    }
}

fn find_data_item<'a>(device: &'a Device, id: &str) -> Option<&'a DataItem> {
    let mut found = None;
    device.each_data_item(|item| {
        if found.is_none() && item.id == id {
            found = Some(item);
        }
    });
    found
}

fn collect_ids(device: &Device) -> Vec<DataItemId> {
    let mut ids = Vec::new();
    device.each_data_item(|item| ids.push(item.id.clone()));
    ids
}

/// Computes topic paths, dispatch keys, unit conversions, and validates
/// category consistency for every data item owned by `device` (spec.md
/// §4.1).
fn derive_device_items(device: &mut Device) -> Result<()> {
    let device_name = device.name.clone().unwrap_or_else(|| device.id.clone());

    // Device-owned data items (e.g. the synthetic Agent's availability item).
    for item in &mut device.data_items {
        derive_one(item, &[device_name.as_str()])?;
    }

    derive_component_items(&mut device.children, &[device_name.as_str()])?;
    Ok(())
}

fn derive_component_items(components: &mut [Component], ancestors: &[&str]) -> Result<()> {
    for component in components {
        let name = component
            .name
            .clone()
            .unwrap_or_else(|| component.id.clone());
        let mut chain: Vec<&str> = ancestors.to_vec();
        chain.push(name.as_str());

        for item in &mut component.data_items {
            derive_one(item, &chain)?;
        }
        derive_component_items(&mut component.children, &chain)?;
    }
    Ok(())
}

fn derive_one(item: &mut DataItem, ancestors: &[&str]) -> Result<()> {
    item.validate_category()
        .map_err(AgentError::ModelLoad)?;

    item.is_vector = UnitConversion::is_vector_units(item.units.as_deref());
    item.conversion = UnitConversion::derive(
        item.units.as_deref(),
        item.native_units.as_deref(),
        item.native_scale,
    );

    let observation_name = observation_name_from_type(&item.data_type);
    item.topic_name = observation_name.clone();
    item.topic_path = topic_path(
        ancestors,
        item.category,
        &observation_name,
        item.name.as_deref(),
    );
    item.dispatch_key = dispatch_key(item.category, &item.data_type, item.is_vector);

    Ok(())
}
