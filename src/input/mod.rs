//! Bridges raw terminal input into dispatches.

mod bridge;
mod detector;

pub use self::bridge::{InputBridge, InputSignal, input_events};
pub use self::detector::{CLICK, ClickDetector, PointerClick, Region};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::EventDispatcher;
    use crate::injection::InjectionBinder;
    use crate::mediation::{LifecycleHost, MediationBinder, View, ViewHost};
    use crossterm::event::{
        Event as CrosstermEvent, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent,
        MouseEventKind,
    };
    use std::sync::{Arc, Mutex};

    fn mouse(kind: MouseEventKind, column: u16, row: u16) -> CrosstermEvent {
        CrosstermEvent::Mouse(MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        })
    }

    fn left_click(column: u16, row: u16) -> CrosstermEvent {
        mouse(MouseEventKind::Down(MouseButton::Left), column, row)
    }

    fn activated_detector(detector: ClickDetector) -> Arc<ClickDetector> {
        let injection = Arc::new(InjectionBinder::new());
        injection
            .bind::<EventDispatcher>()
            .to_type::<EventDispatcher>()
            .unwrap();
        let mediation = MediationBinder::new(injection);
        let detector = Arc::new(detector);
        let view: Arc<dyn View> = detector.clone();
        mediation.on_view_activated(&view).unwrap();
        detector
    }

    #[test]
    fn detector_is_inert_until_injected() {
        let detector = ClickDetector::new("button");
        assert!(detector.dispatcher().is_none());
        assert!(!detector.handle_input(&left_click(1, 1)));
    }

    #[test]
    fn left_press_dispatches_click_locally() {
        let detector = activated_detector(ClickDetector::new("button"));
        let clicks = Arc::new(Mutex::new(Vec::new()));
        let sink = clicks.clone();
        detector
            .dispatcher()
            .unwrap()
            .add_listener(CLICK, move |event| {
                sink.lock().unwrap().push(*event.payload::<PointerClick>().unwrap());
            });

        assert!(detector.handle_input(&left_click(4, 2)));
        assert!(!detector.handle_input(&mouse(MouseEventKind::Up(MouseButton::Left), 4, 2)));
        assert!(!detector.handle_input(&mouse(MouseEventKind::Down(MouseButton::Right), 4, 2)));

        let clicks = clicks.lock().unwrap();
        assert_eq!(clicks.len(), 1);
        assert_eq!((clicks[0].column, clicks[0].row), (4, 2));
    }

    #[test]
    fn region_limits_clicks() {
        let detector =
            activated_detector(ClickDetector::new("button").with_region(Region::new(10, 5, 4, 2)));
        assert!(detector.handle_input(&left_click(10, 5)));
        assert!(detector.handle_input(&left_click(13, 6)));
        assert!(!detector.handle_input(&left_click(14, 6)));
        assert!(!detector.handle_input(&left_click(9, 5)));
    }

    #[test]
    fn bridge_forwards_signals_and_feeds_detectors() {
        let bus = Arc::new(EventDispatcher::new());
        let signals = Arc::new(Mutex::new(Vec::new()));
        for id in [input_events::KEY, input_events::MOUSE, input_events::RESIZE] {
            let sink = signals.clone();
            bus.add_listener(id, move |event| {
                sink.lock()
                    .unwrap()
                    .push(event.payload::<InputSignal>().unwrap().clone());
            });
        }

        let bridge = InputBridge::new(bus);
        let anywhere = activated_detector(ClickDetector::new("a"));
        let corner =
            activated_detector(ClickDetector::new("b").with_region(Region::new(0, 0, 2, 2)));
        bridge.add_detector(&anywhere);
        bridge.add_detector(&corner);
        assert_eq!(bridge.detector_count(), 2);

        let key = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert_eq!(bridge.forward(CrosstermEvent::Key(key)), 0);
        assert_eq!(bridge.forward(left_click(1, 1)), 2);
        assert_eq!(bridge.forward(left_click(5, 5)), 1);
        assert_eq!(bridge.forward(CrosstermEvent::Resize(80, 24)), 0);

        let signals = signals.lock().unwrap();
        assert_eq!(signals.len(), 4);
        assert_eq!(signals[0], InputSignal::Key(key));
        assert_eq!(
            signals[3],
            InputSignal::Resize {
                width: 80,
                height: 24
            }
        );
    }

    #[test]
    fn despawned_detectors_stop_receiving_input() {
        let injection = Arc::new(InjectionBinder::new());
        injection
            .bind::<EventDispatcher>()
            .to_type::<EventDispatcher>()
            .unwrap();
        let mediation = Arc::new(MediationBinder::new(injection));
        let host = ViewHost::new();
        host.attach(mediation);

        let detector = Arc::new(ClickDetector::new("button"));
        let id = host.spawn(detector.clone());
        let bridge = InputBridge::new(Arc::new(EventDispatcher::new()));
        bridge.add_detector(&detector);
        assert_eq!(bridge.forward(left_click(1, 1)), 1);

        host.despawn(id);
        drop(detector);
        assert_eq!(bridge.detector_count(), 0);
        assert_eq!(bridge.forward(left_click(1, 1)), 0);
    }

    #[test]
    fn removed_detectors_are_skipped() {
        let bridge = InputBridge::new(Arc::new(EventDispatcher::new()));
        let detector = activated_detector(ClickDetector::new("button"));
        bridge.add_detector(&detector);

        assert!(bridge.remove_detector(&detector));
        assert!(!bridge.remove_detector(&detector));
        assert_eq!(bridge.detector_count(), 0);
        assert_eq!(bridge.forward(left_click(1, 1)), 0);
    }
}
