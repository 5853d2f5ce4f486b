use std::rc::Rc;
use std::time::Duration;

use stagehand::connection::{ConnectionState, ThreadSpawner};
use stagehand::layout::percent;
use stagehand::playback::{Playback, PlaybackEvent};
use stagehand::renderer::RendererControl;
use stagehand::sync::{Command, WireId};
use stagehand::tree::kinds;
use stagehand::{Binding, Context, FactoryRef, NodeId, Stage, StageConfig, StageEvent, Tree, Value};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn stage(width: f32, height: f32) -> (Stage, RendererControl) {
    init_logger();
    let spawner = ThreadSpawner::new();
    let control = spawner.control();
    let config = StageConfig::default()
        .width(width)
        .height(height)
        .connect_backoff(Duration::from_millis(10));
    let stage = Stage::with_spawner(config, Box::new(spawner)).unwrap();
    (stage, control)
}

/// Dispatch until the renderer has reported something.
fn wait_for_events(stage: &mut Stage) -> Vec<StageEvent> {
    for _ in 0..200 {
        stage.dispatch(Some(Duration::from_millis(10))).unwrap();
        let events = stage.take_events();
        if !events.is_empty() {
            return events;
        }
    }
    Vec::new()
}

fn wire(stage: &Stage, node: NodeId) -> WireId {
    stage.tree().wire_id(node).unwrap()
}

#[test]
fn test_percent_rectangle_follows_layer() {
    let (mut stage, control) = stage(800.0, 600.0);
    let rect = stage.tree_mut().create(kinds::RECTANGLE);
    stage.tree_mut().set_width(rect, percent(50.0));
    stage.tree_mut().set_height(rect, 100.0);
    stage.add(rect, stage.layer()).unwrap();

    stage.sync().unwrap();
    let scene = control.scene();
    let id = wire(&stage, rect);
    assert_eq!(scene.attr(id, "width"), Some(&Value::Float(400.0)));
    assert_eq!(scene.attr(id, "height"), Some(&Value::Float(100.0)));
    assert!(scene.is_attached(id));

    let layer = stage.layer();
    stage.tree_mut().set_width(layer, 400.0);
    stage.sync().unwrap();
    let update = stage
        .last_batch()
        .iter()
        .find_map(|c| match c {
            Command::Update { id: target, attrs } if *target == id => Some(attrs.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(update.len(), 1);
    assert_eq!(update.get("width"), Some(&Value::Float(200.0)));
    assert_eq!(control.scene().attr(id, "width"), Some(&Value::Float(200.0)));
}

#[test]
fn test_quiet_sync_sends_nothing() {
    let (mut stage, _control) = stage(640.0, 480.0);
    let text = stage.tree_mut().create(kinds::TEXT);
    stage.tree_mut().set(text, "text", "hello");
    stage.add(text, stage.layer()).unwrap();

    stage.sync().unwrap();
    assert!(!stage.last_batch().is_empty());
    stage.sync().unwrap();
    assert!(stage.last_batch().is_empty());
    assert_eq!(stage.cycles(), 2);
}

#[test]
fn test_capabilities_announced() {
    let (mut stage, _control) = stage(640.0, 480.0);
    assert!(stage.capabilities().is_none());
    stage.sync().unwrap();
    let caps = stage.capabilities().unwrap();
    assert_eq!(caps.player_backends, ["headless"]);
    assert_eq!(caps.refresh_rates, [60.0]);
}

#[test]
fn test_renderer_crash_rebuilds_scene() {
    let (mut stage, control) = stage(800.0, 600.0);
    let layer = stage.layer();
    let mut nodes = Vec::new();
    for _ in 0..3 {
        let node = stage.tree_mut().create(kinds::RECTANGLE);
        stage.add(node, layer).unwrap();
        nodes.push(node);
    }
    stage.sync().unwrap();
    assert_eq!(stage.generation(), 1);

    assert!(control.kill());
    stage.tree_mut().set(nodes[0], "color", "red");
    stage.sync().unwrap();
    assert_eq!(stage.connection_state(), ConnectionState::Down);

    // Queued while the renderer is gone
    stage.hide();
    stage.sync().unwrap();
    assert_eq!(stage.connection_state(), ConnectionState::Running);
    assert_eq!(stage.generation(), 2);
    assert_eq!(control.spawns(), 2);

    let added: Vec<WireId> = stage
        .last_batch()
        .iter()
        .filter_map(|c| match c {
            Command::Add { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    let expected: Vec<WireId> = std::iter::once(layer)
        .chain(nodes.iter().copied())
        .map(|n| wire(&stage, n))
        .collect();
    assert_eq!(added, expected);

    let scene = control.scene();
    assert_eq!(scene.attr(wire(&stage, nodes[0]), "color"), Some(&Value::from("red")));
    let layer_node = scene.get(wire(&stage, layer)).unwrap();
    assert!(layer_node.hidden);
    assert_eq!(layer_node.calls, ["hide"]);

    stage.sync().unwrap();
    assert!(stage.last_batch().is_empty());
    assert_eq!(control.scene().get(wire(&stage, layer)).unwrap().calls.len(), 1);
}

#[test]
fn test_idle_renderer_crash_is_detected() {
    let (mut stage, control) = stage(800.0, 600.0);
    let rect = stage.tree_mut().create(kinds::RECTANGLE);
    stage.tree_mut().set(rect, "color", "blue");
    stage.add(rect, stage.layer()).unwrap();
    stage.sync().unwrap();
    assert_eq!(stage.generation(), 1);

    // No mutation follows: only polling can notice the dead renderer
    assert!(control.kill());
    for _ in 0..200 {
        stage.dispatch(Some(Duration::from_millis(10))).unwrap();
        if stage.generation() == 2 {
            break;
        }
    }
    assert_eq!(stage.connection_state(), ConnectionState::Running);
    assert_eq!(stage.generation(), 2);
    assert_eq!(control.spawns(), 2);

    let scene = control.scene();
    let id = wire(&stage, rect);
    assert!(scene.is_attached(id));
    assert_eq!(scene.attr(id, "color"), Some(&Value::from("blue")));
}

#[test]
fn test_key_press_reaches_application() {
    let (mut stage, control) = stage(320.0, 240.0);
    stage.sync().unwrap();
    assert!(control.inject_key("Return"));
    let events = wait_for_events(&mut stage);
    assert_eq!(events, [StageEvent::KeyPress("Return".into())]);
}

#[test]
fn test_context_change_replaces_node_on_renderer() {
    let (mut stage, control) = stage(800.0, 600.0);
    let factory: FactoryRef = Rc::new(|tree: &mut Tree, binding: &mut Binding<'_>| {
        let id = tree.create(kinds::TEXT);
        let title = binding.get_or("title", "untitled");
        tree.set(id, "text", title);
        id
    });

    let group = stage.tree_mut().create(kinds::GROUP);
    stage.add(group, stage.layer()).unwrap();
    let label = stage
        .tree_mut()
        .instantiate(factory, &Context::new().with("title", "Home"));
    stage.tree_mut().set_parent(label, Some(group)).unwrap();
    stage.sync().unwrap();
    let old_wire = wire(&stage, label);

    stage
        .tree_mut()
        .set_context(group, Context::new().with("title", "Home"));
    stage.sync().unwrap();
    assert!(stage.tree().contains(label));
    assert!(!stage.last_batch().iter().any(|c| matches!(c, Command::Call { .. })));

    stage
        .tree_mut()
        .set_context(group, Context::new().with("title", "Settings"));
    stage.sync().unwrap();
    let replacement = stage.tree().children(group)[0];
    assert_ne!(replacement, label);
    assert!(stage.last_batch().iter().any(|c| matches!(
        c,
        Command::Call { id, method, .. } if *id == old_wire && method == "replace"
    )));

    // The renderer answered `replaced` within the same batch
    let events = stage.take_events();
    assert!(events.contains(&StageEvent::WidgetCall {
        node: label,
        method: "replaced".into(),
        args: vec![]
    }));
    assert!(!stage.tree().contains(label));

    stage.sync().unwrap();
    assert_eq!(
        stage.last_batch().commit.last(),
        Some(&Command::Delete { id: old_wire })
    );
    let scene = control.scene();
    assert!(scene.get(old_wire).is_none());
    assert_eq!(
        scene.attr(wire(&stage, replacement), "text"),
        Some(&Value::from("Settings"))
    );
}

#[test]
fn test_imports_survive_reconnect() {
    let (mut stage, control) = stage(800.0, 600.0);
    stage.import("widgets", "/usr/share/widgets");
    let clock = stage.tree_mut().create("widgets.Clock");
    stage.add(clock, stage.layer()).unwrap();
    stage.sync().unwrap();
    assert_eq!(stage.last_report().failed, 0);
    assert_eq!(control.scene().get(wire(&stage, clock)).unwrap().kind, "widgets.Clock");

    control.kill();
    stage.tree_mut().set(clock, "format", "%H:%M");
    stage.sync().unwrap();
    stage.sync().unwrap();
    assert_eq!(stage.last_report().failed, 0);
    let scene = control.scene();
    assert!(scene.imports().contains_key("widgets"));
    assert!(scene.get(wire(&stage, clock)).is_some());
}

#[test]
fn test_playback_events() {
    let (mut stage, _control) = stage(800.0, 600.0);
    let video = Playback::create(stage.tree_mut());
    stage.add(video.node(), stage.layer()).unwrap();
    video.play(stage.tree_mut(), "file:///movie.mkv");
    stage.sync().unwrap();

    let decoded: Vec<PlaybackEvent> = stage
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            StageEvent::WidgetCall { node, method, args } if node == video.node() => {
                PlaybackEvent::from_widget_call(&method, &args)
            }
            _ => None,
        })
        .collect();
    assert_eq!(decoded.len(), 1);
    let PlaybackEvent::StreamInfo(info) = &decoded[0] else {
        panic!("expected stream info, got {decoded:?}");
    };
    assert_eq!(info.get("uri"), Some(&Value::from("file:///movie.mkv")));

    video.stop(stage.tree_mut());
    stage.sync().unwrap();
    let events = stage.take_events();
    assert!(matches!(
        &events[..],
        [StageEvent::WidgetCall { method, .. }] if method == "finished"
    ));
}
