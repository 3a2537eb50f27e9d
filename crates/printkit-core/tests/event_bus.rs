//! Tests for the printer event bus

use printkit_core::{ChannelKind, EventDispatcher, PrinterEvent};

#[test]
fn test_publish_without_subscribers_is_dropped() {
    let dispatcher = EventDispatcher::new(4);
    assert_eq!(dispatcher.subscriber_count(), 0);
    assert_eq!(dispatcher.publish(PrinterEvent::Booted), 0);
}

#[tokio::test]
async fn test_subscribers_receive_in_order() {
    let dispatcher = EventDispatcher::default();
    let mut rx = dispatcher.subscribe();

    dispatcher.publish(PrinterEvent::Booted);
    dispatcher.publish(PrinterEvent::CommandFinished(ChannelKind::Serial));
    dispatcher.publish(PrinterEvent::ProbeHeight {
        point: 2,
        height: 0.25,
    });

    assert_eq!(rx.recv().await.unwrap(), PrinterEvent::Booted);
    assert_eq!(
        rx.recv().await.unwrap(),
        PrinterEvent::CommandFinished(ChannelKind::Serial)
    );
    assert_eq!(
        rx.recv().await.unwrap(),
        PrinterEvent::ProbeHeight {
            point: 2,
            height: 0.25
        }
    );
}

#[test]
fn test_event_display() {
    assert_eq!(
        PrinterEvent::CommandFinished(ChannelKind::SdCard).to_string(),
        "Command finished on sdcard"
    );
    assert_eq!(
        PrinterEvent::StorageMounted { blocks: 8 }.to_string(),
        "Storage mounted (8 blocks)"
    );
}
