mod common;

use common::{Collector, cloud, test_plugins};
use point_cloud_transport::{
    AdvertiseOptions, NodeHandle, PointCloud2, PointCloudTransport, TransportError,
    TransportHints, TrackedObject,
};
use std::sync::{Arc, Mutex};

fn setup() -> (NodeHandle, PointCloudTransport) {
    let nh = NodeHandle::new("talker");
    let pct = PointCloudTransport::with_plugins(nh.clone(), test_plugins());
    (nh, pct)
}

#[test]
fn test_advertises_every_loadable_transport() {
    let (_nh, pct) = setup();
    let publisher = pct.advertise("points", 5, false).unwrap();

    assert_eq!(publisher.topic(), "/points");
    assert_eq!(publisher.transports(), vec!["raw", "framed"]);
    assert_eq!(
        publisher.transport_topics(),
        vec!["/points", "/points/framed"]
    );
    assert!(publisher.is_valid());
}

#[test]
fn test_relative_topic_resolves_in_namespace() {
    let nh = NodeHandle::new("robot/talker");
    let pct = PointCloudTransport::with_plugins(nh, test_plugins());
    let publisher = pct.advertise("points", 1, false).unwrap();

    assert_eq!(publisher.topic(), "/robot/points");
}

#[test]
fn test_disable_pub_plugins_parameter() {
    let (nh, pct) = setup();
    nh.set_param("/points/disable_pub_plugins", vec!["framed"])
        .unwrap();

    let publisher = pct.advertise("points", 1, false).unwrap();
    assert_eq!(publisher.transports(), vec!["raw"]);

    let other = pct.advertise("other", 1, false).unwrap();
    assert_eq!(other.transports(), vec!["raw", "framed"]);
}

#[test]
fn test_all_transports_disabled() {
    let (nh, pct) = setup();
    nh.set_param("/points/disable_pub_plugins", vec!["raw", "framed"])
        .unwrap();

    assert!(matches!(
        pct.advertise("points", 1, false),
        Err(TransportError::NoPlugins { .. })
    ));
}

#[test]
fn test_publish_reaches_subscribers_of_each_transport() {
    let (nh, pct) = setup();
    let publisher = pct.advertise("points", 5, false).unwrap();

    let raw = Collector::default();
    let framed = Collector::default();
    let _raw_sub = pct
        .subscribe_with("points", 5, raw.callback(), None, TransportHints::new("raw"))
        .unwrap();
    let _framed_sub = pct
        .subscribe_with("points", 5, framed.callback(), None, TransportHints::new("framed"))
        .unwrap();

    assert_eq!(publisher.num_subscribers(), 2);

    publisher.publish(cloud(3));
    publisher.publish(Arc::new(cloud(4)));
    nh.spin_once();

    assert_eq!(raw.widths(), vec![3, 4]);
    assert_eq!(framed.widths(), vec![3, 4]);
}

#[test]
fn test_publish_without_subscribers_is_a_no_op() {
    let (nh, pct) = setup();
    let publisher = pct.advertise("points", 1, false).unwrap();

    assert_eq!(publisher.num_subscribers(), 0);
    publisher.publish(cloud(1));
    assert_eq!(nh.spin_once(), 0);
}

#[test]
fn test_connect_and_disconnect_callbacks() {
    let (nh, pct) = setup();
    let events = Arc::new(Mutex::new(Vec::new()));

    let connects = events.clone();
    let disconnects = events.clone();
    let options = AdvertiseOptions::default()
        .on_connect(move |single| {
            connects
                .lock()
                .unwrap()
                .push(format!("connect {}", single.topic()));
            single.publish(&Arc::new(cloud(7))).unwrap();
        })
        .on_disconnect(move |single| {
            disconnects
                .lock()
                .unwrap()
                .push(format!("disconnect {}", single.topic()));
        });
    let _publisher = pct.advertise_with("points", 1, options).unwrap();

    let collector = Collector::default();
    let subscriber = pct
        .subscribe_with("points", 1, collector.callback(), None, TransportHints::new("framed"))
        .unwrap();
    nh.spin_once();
    assert_eq!(collector.widths(), vec![7]);

    subscriber.shutdown();
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "connect /points/framed".to_string(),
            "disconnect /points/framed".to_string(),
        ]
    );
}

#[test]
fn test_callbacks_skipped_after_tracked_object_dropped() {
    let (_nh, pct) = setup();
    let events = Arc::new(Mutex::new(0));
    let tracked: TrackedObject = Arc::new(());

    let counter = events.clone();
    let options = AdvertiseOptions::default()
        .on_connect(move |_| *counter.lock().unwrap() += 1)
        .tracked(tracked.clone());
    let _publisher = pct.advertise_with("points", 1, options).unwrap();

    let _first = pct.subscribe("points", 1, |_| {}).unwrap();
    drop(tracked);
    let _second = pct.subscribe("points", 1, |_| {}).unwrap();

    assert_eq!(*events.lock().unwrap(), 1);
}

#[test]
fn test_latched_transport_serves_late_subscribers() {
    let (nh, pct) = setup();
    let publisher = pct.advertise("map", 1, true).unwrap();

    let early = Collector::default();
    let _early_sub = pct.subscribe("map", 1, early.callback()).unwrap();
    publisher.publish(cloud(9));

    let late = Collector::default();
    let _late_sub = pct.subscribe("map", 1, late.callback()).unwrap();
    nh.spin_once();

    assert_eq!(early.widths(), vec![9]);
    assert_eq!(late.widths(), vec![9]);
}

#[test]
fn test_shutdown_invalidates_all_clones() {
    let (nh, pct) = setup();
    let publisher = pct.advertise("points", 1, false).unwrap();
    let clone = publisher.clone();

    let collector = Collector::default();
    let _sub = pct.subscribe("points", 1, collector.callback()).unwrap();

    publisher.shutdown();
    assert!(!clone.is_valid());
    assert_eq!(clone.num_subscribers(), 0);

    clone.publish(PointCloud2::default());
    nh.spin_once();
    assert!(collector.widths().is_empty());
    assert!(nh.topics().iter().all(|(topic, _)| topic != "/points/framed"));
}

#[test]
fn test_dropping_last_clone_unadvertises() {
    let (nh, pct) = setup();
    let publisher = pct.advertise("points", 1, false).unwrap();
    let clone = publisher.clone();

    drop(publisher);
    assert_eq!(nh.topics().len(), 2);

    drop(clone);
    assert!(nh.topics().is_empty());
}
