#![allow(missing_docs)]

//! Integration tests exercising the concrete scenarios of spec.md §8,
//! driving the agent end to end through [`mtconnect_core::Agent::ingest`]
//! the way a transport would feed it SHDR lines.

use mtconnect_core::model::{Constraints, DataItemCategory, Filter, Representation};
use mtconnect_core::{Agent, Component, Config, DataItem, Device, DeviceModel, ObservationValue};

fn data_item(id: &str, name: &str, data_type: &str, category: DataItemCategory, representation: Representation) -> DataItem {
    DataItem {
        id: id.into(),
        name: Some(name.into()),
        data_type: data_type.into(),
        sub_type: None,
        category,
        representation,
        units: None,
        native_units: None,
        native_scale: None,
        filter: Filter::default(),
        reset_trigger: None,
        source: None,
        initial_value: None,
        constraints: None::<Constraints>,
        allow_dups: false,
        conversion: None,
        is_vector: false,
        topic_path: String::new(),
        topic_name: String::new(),
        dispatch_key: String::new(),
    }
}

fn single_item_model(item: DataItem) -> DeviceModel {
    let mut device = Device::new("dev1");
    device.uuid = Some("uuid-1".into());
    device.name = Some("Mill1".into());
    let mut controller = Component::new("c1", "Controller");
    controller.data_items.push(item);
    device.children.push(controller);
    DeviceModel::load(vec![device]).unwrap()
}

/// S1 — tokenisation and duplicate suppression: two identical `line` events
/// in a row collapse to one stored observation.
#[test]
fn s1_tokenisation_and_duplicate_suppression() {
    let item = data_item(
        "line1",
        "line",
        "LINE",
        DataItemCategory::Event,
        Representation::Value,
    );
    let model = single_item_model(item);
    let agent = Agent::new(Config::for_testing(), model);
    agent.start();

    agent.ingest("adapter1", "2021-02-01T12:00:00Z|line|RUNNING204");
    agent.ingest("adapter1", "2021-02-01T12:00:00Z|line|RUNNING204");
    agent.ingest("adapter1", "2021-02-01T12:00:00Z|line|RUNNING205");

    let buffer = agent.circular_buffer();
    let (observations, _next, _eob) = buffer.range(None, None, 7, None).unwrap();
    let values: Vec<String> = observations
        .iter()
        .filter_map(|obs| match &obs.value {
            ObservationValue::Unavailable => Some("UNAVAILABLE".to_string()),
            ObservationValue::Text(t) => Some(t.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(values, vec!["UNAVAILABLE", "RUNNING204", "RUNNING205"]);
}

/// S2 — condition chain transitions: faults accumulate by `nativeCode` and
/// clear individually or entirely on NORMAL.
#[test]
fn s2_condition_chain() {
    let item = data_item(
        "lp1",
        "lp",
        "LOGIC_PROGRAM",
        DataItemCategory::Condition,
        Representation::Value,
    );
    let model = single_item_model(item);
    let agent = Agent::new(Config::for_testing(), model);
    agent.start();

    agent.ingest("adapter1", "2021-01-01T00:00:01Z|lp|NORMAL||||XXX");
    let cp = agent.circular_buffer().latest();
    let chain = cp.get("lp1").unwrap().all();
    assert_eq!(chain.len(), 1);

    agent.ingest("adapter1", "2021-01-01T00:00:02Z|lp|FAULT|2218|ALARM_B|HIGH|msg1");
    let cp = agent.circular_buffer().latest();
    let chain = cp.get("lp1").unwrap().all();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].native_code(), Some("2218"));

    agent.ingest("adapter1", "2021-01-01T00:00:03Z|lp|FAULT|4200|ALARM_D||msg2");
    let cp = agent.circular_buffer().latest();
    let chain = cp.get("lp1").unwrap().all();
    assert_eq!(chain.len(), 2);

    agent.ingest("adapter1", "2021-01-01T00:00:04Z|lp|NORMAL|2218||");
    let cp = agent.circular_buffer().latest();
    let chain = cp.get("lp1").unwrap().all();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].native_code(), Some("4200"));

    agent.ingest("adapter1", "2021-01-01T00:00:05Z|lp|NORMAL||||");
    let cp = agent.circular_buffer().latest();
    let chain = cp.get("lp1").unwrap().all();
    assert_eq!(chain.len(), 1);
    assert!(matches!(
        chain[0].condition_level(),
        Some(mtconnect_core::ConditionLevel::Normal)
    ));
}

/// S3 — data-set merge, delete, and RESET semantics.
#[test]
fn s3_data_set_update() {
    let item = data_item(
        "vars1",
        "vars",
        "VARIABLE",
        DataItemCategory::Event,
        Representation::DataSet,
    );
    let model = single_item_model(item);
    let agent = Agent::new(Config::for_testing(), model);
    agent.start();

    agent.ingest("adapter1", "2021-01-01T00:00:01Z|vars|a=1 b=2 c=3");
    let set = data_set(&agent, "vars1");
    assert_eq!(set.len(), 3);
    assert_eq!(set.get("c").map(String::as_str), Some("3"));

    agent.ingest("adapter1", "2021-01-01T00:00:02Z|vars|c=5");
    let set = data_set(&agent, "vars1");
    assert_eq!(set.len(), 3);
    assert_eq!(set.get("c").map(String::as_str), Some("5"));

    agent.ingest("adapter1", "2021-01-01T00:00:03Z|vars|RESET|d=10");
    let set = data_set(&agent, "vars1");
    assert_eq!(set.len(), 1);
    assert_eq!(set.get("d").map(String::as_str), Some("10"));

    agent.ingest("adapter1", "2021-01-01T00:00:04Z|vars|c=6");
    let set = data_set(&agent, "vars1");
    assert_eq!(set.len(), 2);
    assert_eq!(set.get("c").map(String::as_str), Some("6"));
    assert_eq!(set.get("d").map(String::as_str), Some("10"));
}

fn data_set(agent: &Agent, id: &str) -> std::collections::BTreeMap<String, String> {
    match &agent.circular_buffer().latest_for(id).unwrap().value {
        ObservationValue::DataSet(set) => set.clone(),
        other => panic!("expected a data set, got {other:?}"),
    }
}

/// S4 — buffer wrap and `at` correctness: a capacity-8 buffer retains only
/// the most recent window after 20 appends.
#[test]
fn s4_buffer_wrap_and_at_correctness() {
    let item = data_item(
        "line1",
        "line",
        "LINE",
        DataItemCategory::Event,
        Representation::Value,
    );
    let model = single_item_model(item);
    // Config::for_testing() gives buffer_exponent=3 (capacity 8).
    let agent = Agent::new(Config::for_testing(), model);
    for i in 0..20 {
        agent.ingest(
            "adapter1",
            &format!("2021-01-01T00:00:{:02}Z|line|event{}", i % 60, i),
        );
    }

    let buffer = agent.circular_buffer();
    assert_eq!(buffer.first_sequence(), 13);
    assert_eq!(buffer.sequence(), 21);
    assert!(buffer.at(13).is_some());
    assert!(buffer.at(12).is_none());
    assert!(buffer.at(20).is_some());

    let cp17 = buffer.checkpoint_at(17, None);
    assert!(cp17.get("line1").is_some());
}

/// S6 — asset add/remove emits synthetic ASSET_CHANGED/ASSET_REMOVED
/// observations, and the last removal marks ASSET_CHANGED unavailable.
#[test]
fn s6_asset_add_remove_emits_synthetic_observations() {
    let mut agent_device = Device::new("agent");
    agent_device.device_type = "Agent".into();
    let mut controller = Component::new("ac", "Controller");
    controller.data_items.push(data_item(
        "asset_changed1",
        "asset_chg",
        "ASSET_CHANGED",
        DataItemCategory::Event,
        Representation::Value,
    ));
    controller.data_items.push(data_item(
        "asset_removed1",
        "asset_rem",
        "ASSET_REMOVED",
        DataItemCategory::Event,
        Representation::Value,
    ));
    agent_device.children.push(controller);
    let device = Device::new("dev1");
    let model = DeviceModel::load(vec![agent_device, device]).unwrap();

    let agent = Agent::new(Config::for_testing(), model);
    agent.start();

    agent.ingest(
        "adapter1",
        "2021-01-01T00:00:01Z|@ASSET@|P1|Part|<Part assetId='P1'>X</Part>",
    );
    let changed = agent.circular_buffer().latest_for("asset_changed1").unwrap();
    assert_eq!(changed.value, ObservationValue::Text("P1".into()));
    assert_eq!(agent.asset_store().get("P1").unwrap().body, "<Part assetId='P1'>X</Part>");

    agent.ingest("adapter1", "2021-01-01T00:00:02Z|@REMOVE_ASSET@|P1");
    let removed = agent.circular_buffer().latest_for("asset_removed1").unwrap();
    assert_eq!(removed.value, ObservationValue::Text("P1".into()));
    let changed_again = agent.circular_buffer().latest_for("asset_changed1").unwrap();
    assert!(changed_again.is_unavailable());
}

/// S5 — sequence numbers never truncate at the 32-bit boundary even though
/// SHDR and legacy clients historically treated them as `unsigned int`.
#[test]
fn s5_sequence_does_not_truncate_at_32_bits() {
    let item = data_item(
        "line1",
        "line",
        "LINE",
        DataItemCategory::Event,
        Representation::Value,
    );
    let model = single_item_model(item);
    let agent = Agent::new(Config::for_testing(), model);
    agent.start();

    agent.circular_buffer().set_sequence(0xFFFF_FFA0);
    for i in 0..128 {
        agent.ingest(
            "adapter1",
            &format!("2021-01-01T00:00:{:02}Z|line|event{}", i % 60, i),
        );
    }

    let buffer = agent.circular_buffer();
    assert!(buffer.sequence() > 0xFFFF_FFFF);
    let last = buffer.sequence() - 1;
    assert!(buffer.at(last).is_some());
}

/// Model reload remaps surviving data item ids and orphans observations
/// whose data item disappeared, per spec.md §9's Open Question.
#[test]
fn reload_orphans_unmapped_observations() {
    let item = data_item(
        "line1",
        "line",
        "LINE",
        DataItemCategory::Event,
        Representation::Value,
    );
    let model = single_item_model(item);
    let agent = Agent::new(Config::for_testing(), model);
    agent.start();
    agent.ingest("adapter1", "2021-01-01T00:00:01Z|line|RUNNING");

    let mut new_device = Device::new("dev1");
    new_device.uuid = Some("uuid-1".into());
    new_device.name = Some("Mill1".into());
    // No data items at all: "line1" has nothing to remap to.
    let new_model = vec![new_device];
    agent.reload_devices(new_model).unwrap();

    let buffer = agent.circular_buffer();
    let (observations, _next, _eob) = buffer.range(None, None, 7, None).unwrap();
    // The orphaned "line" observations are retained but skipped by range().
    assert!(observations.iter().all(|o| o.data_item_id != "line1"));
}
