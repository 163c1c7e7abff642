// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the USB presence monitor

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use uvc_session::backends::usb::{
    ChannelListener, DevicePresenceMonitor, PermissionStatus, PresenceEvent, PresenceListener,
};
use uvc_session::config::MonitorConfig;
use uvc_session::errors::PresenceError;

type Changes = Arc<Mutex<Vec<(bool, usize)>>>;

/// Monitor whose scan thread stays idle, so tests drive scans themselves
fn quiet_monitor(platform: &Arc<MockPlatform>) -> DevicePresenceMonitor {
    let config = MonitorConfig {
        initial_delay: Duration::from_secs(3600),
        ..MonitorConfig::default()
    };
    DevicePresenceMonitor::new(platform.clone(), config)
}

fn recording_listener() -> (Arc<dyn PresenceListener>, Changes) {
    let changes: Changes = Arc::default();
    let sink = changes.clone();
    let listener: Arc<dyn PresenceListener> =
        Arc::new(move |attached: bool, device_count: usize| {
            sink.lock().unwrap().push((attached, device_count));
        });
    (listener, changes)
}

#[test]
fn test_scan_reports_growth_and_permission_gains() {
    let platform = MockPlatform::new();
    let monitor = quiet_monitor(&platform);
    let (listener, changes) = recording_listener();
    monitor.register(listener).unwrap();

    // Poll 1: nothing attached
    monitor.scan().unwrap();
    assert!(changes.lock().unwrap().is_empty());

    // Poll 2: one camera, no permission
    platform.set_devices(vec![camera_device(1)]);
    monitor.scan().unwrap();
    assert_eq!(*changes.lock().unwrap(), vec![(true, 1)]);

    // Poll 3: same camera, permission granted
    platform.grant(&camera_device(1).device_name);
    monitor.scan().unwrap();
    assert_eq!(*changes.lock().unwrap(), vec![(true, 1), (true, 1)]);

    // Poll 4: a second camera
    platform.set_devices(vec![camera_device(1), camera_device(2)]);
    monitor.scan().unwrap();
    assert_eq!(
        *changes.lock().unwrap(),
        vec![(true, 1), (true, 1), (true, 2)]
    );
    assert_eq!(monitor.permitted_count(), 1);
}

#[test]
fn test_unchanged_scan_is_silent() {
    let platform = MockPlatform::new();
    platform.set_devices(vec![camera_device(1)]);
    let monitor = quiet_monitor(&platform);
    let (listener, changes) = recording_listener();
    monitor.register(listener).unwrap();

    monitor.scan().unwrap();
    monitor.scan().unwrap();
    monitor.scan().unwrap();
    assert_eq!(*changes.lock().unwrap(), vec![(true, 1)]);
}

#[test]
fn test_silent_drop_lowers_baseline() {
    let platform = MockPlatform::new();
    let monitor = quiet_monitor(&platform);
    let (listener, changes) = recording_listener();
    monitor.register(listener).unwrap();

    platform.set_devices(vec![camera_device(1), camera_device(2)]);
    monitor.scan().unwrap();

    // Shrinking without a detach notification is not reported
    platform.set_devices(vec![camera_device(1)]);
    monitor.scan().unwrap();
    assert_eq!(*changes.lock().unwrap(), vec![(true, 2)]);

    // Coming back counts as growth again
    platform.set_devices(vec![camera_device(1), camera_device(2)]);
    monitor.scan().unwrap();
    assert_eq!(*changes.lock().unwrap(), vec![(true, 2), (true, 2)]);
}

#[test]
fn test_filters_exclude_non_cameras() {
    let platform = MockPlatform::new();
    platform.set_devices(vec![keyboard_device(1), camera_device(1)]);
    let monitor = quiet_monitor(&platform);

    let devices = monitor.device_list().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_name, camera_device(1).device_name);

    // No filters accept everything
    let unfiltered = DevicePresenceMonitor::new(
        platform.clone(),
        MonitorConfig {
            filters: Vec::new(),
            ..MonitorConfig::default()
        },
    );
    assert_eq!(unfiltered.device_count().unwrap(), 2);
}

#[test]
fn test_detach_notifies_and_closes_control_block() {
    let platform = MockPlatform::new();
    platform.set_devices(vec![camera_device(1), camera_device(2), keyboard_device(1)]);
    platform.grant(&camera_device(1).device_name);
    let monitor = quiet_monitor(&platform);
    let (listener, changes) = recording_listener();
    monitor.register(listener).unwrap();
    monitor.scan().unwrap();
    assert_eq!(monitor.permitted_count(), 1);

    let device = monitor.device_list().unwrap()[0].clone();
    let block = monitor.open_device(&device).unwrap();
    assert!(!block.is_closed());

    // A detached keyboard is ignored; the camera detach arrives after it
    platform.detach(&keyboard_device(1).device_name);
    platform.detach(&device.device_name);
    assert!(wait_until(WAIT, || changes.lock().unwrap().len() == 2));

    assert_eq!(*changes.lock().unwrap(), vec![(true, 2), (false, 1)]);
    assert!(block.is_closed());
    assert_eq!(monitor.permitted_count(), 0);
}

#[test]
fn test_open_device_shares_block_and_needs_permission() {
    let platform = MockPlatform::new();
    platform.set_devices(vec![camera_device(1)]);
    let monitor = quiet_monitor(&platform);
    let device = monitor.device_list().unwrap()[0].clone();

    assert!(matches!(
        monitor.open_device(&device),
        Err(PresenceError::PermissionDenied(_))
    ));

    platform.grant(&device.device_name);
    let first = monitor.open_device(&device).unwrap();
    let second = monitor.open_device(&device).unwrap();
    first.close();
    assert!(second.is_closed());

    // A closed block is replaced by a fresh one
    assert!(!monitor.open_device(&device).unwrap().is_closed());
}

#[tokio::test]
async fn test_permission_request_round_trip() {
    let platform = MockPlatform::new();
    platform.set_devices(vec![camera_device(1)]);
    let monitor = quiet_monitor(&platform);
    let (listener, mut events) = ChannelListener::new();
    monitor.register(listener).unwrap();

    let device = monitor.device_list().unwrap()[0].clone();
    assert!(!monitor.has_permission(&device).unwrap());
    assert_eq!(
        monitor.request_permission(&device).unwrap(),
        PermissionStatus::Requested
    );
    assert_eq!(platform.requests(), vec![device.device_name.clone()]);

    platform.answer(&device, true);
    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap();
    assert_eq!(
        event,
        Some(PresenceEvent::Permission {
            device: (*device).clone(),
            granted: true
        })
    );

    assert_eq!(
        monitor.request_permission(&device).unwrap(),
        PermissionStatus::AlreadyGranted
    );
    assert_eq!(platform.requests().len(), 1);
    assert!(monitor.open_device(&device).is_ok());
}

#[test]
fn test_unregister_stops_platform_events() {
    let platform = MockPlatform::new();
    let monitor = quiet_monitor(&platform);
    let (listener, _changes) = recording_listener();

    monitor.register(listener.clone()).unwrap();
    assert!(monitor.is_registered());
    assert!(platform.is_subscribed());

    monitor.unregister();
    assert!(!monitor.is_registered());
    assert!(!platform.is_subscribed());
    monitor.unregister();

    monitor.register(listener).unwrap();
    assert!(monitor.is_registered());
}

#[test]
fn test_destroyed_monitor_refuses_calls() {
    let platform = MockPlatform::new();
    platform.set_devices(vec![camera_device(1)]);
    platform.grant(&camera_device(1).device_name);
    let monitor = quiet_monitor(&platform);
    let (listener, _changes) = recording_listener();
    monitor.register(listener.clone()).unwrap();
    let device = monitor.device_list().unwrap()[0].clone();
    let block = monitor.open_device(&device).unwrap();

    monitor.destroy();
    monitor.destroy();

    assert!(monitor.is_destroyed());
    assert!(!platform.is_subscribed());
    assert!(block.is_closed());
    assert_eq!(monitor.register(listener), Err(PresenceError::AlreadyDestroyed));
    assert_eq!(monitor.scan(), Err(PresenceError::AlreadyDestroyed));
    assert_eq!(monitor.device_list(), Err(PresenceError::AlreadyDestroyed));
    assert_eq!(
        monitor.has_permission(&device),
        Err(PresenceError::AlreadyDestroyed)
    );
}

#[test]
fn test_scan_thread_reports_attach() {
    let platform = MockPlatform::new();
    let monitor = DevicePresenceMonitor::new(
        platform.clone(),
        MonitorConfig {
            initial_delay: Duration::from_millis(10),
            scan_interval: Duration::from_millis(20),
            ..MonitorConfig::default()
        },
    );
    let (listener, changes) = recording_listener();
    monitor.register(listener).unwrap();

    platform.set_devices(vec![camera_device(1)]);
    assert!(wait_until(WAIT, || changes.lock().unwrap().contains(&(true, 1))));
}

#[test]
fn test_detach_after_scan_missed_the_device() {
    let platform = MockPlatform::new();
    platform.set_devices(vec![camera_device(1), camera_device(2)]);
    platform.grant(&camera_device(1).device_name);
    let monitor = quiet_monitor(&platform);
    let (listener, changes) = recording_listener();
    monitor.register(listener).unwrap();
    monitor.scan().unwrap();

    let device = monitor
        .device_list()
        .unwrap()
        .into_iter()
        .find(|d| d.device_name == camera_device(1).device_name)
        .unwrap();
    let block = monitor.open_device(&device).unwrap();

    // A scan runs between the unplug and the removal notification
    let unplugged = platform.unplug(&device.device_name).unwrap();
    let other = platform.unplug(&camera_device(2).device_name).unwrap();
    monitor.scan().unwrap();
    platform.notify_detached(&unplugged);
    platform.notify_detached(&other);

    assert!(wait_until(WAIT, || changes.lock().unwrap().len() == 3));
    assert_eq!(
        *changes.lock().unwrap(),
        vec![(true, 2), (false, 0), (false, 0)]
    );
    assert!(block.is_closed());
    assert_eq!(monitor.permitted_count(), 0);
}
