#![allow(dead_code)]

use std::time::Duration;

use troupe::{Actor, Behaviour, BoxedMessage, Context, System, SystemConfig};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn test_system() -> System {
    troupe::logging::init_test();
    System::new(SystemConfig::default()).expect("tokio runtime available in tests")
}

/// Receives one event with a bounded wait, so a broken exchange fails the
/// test instead of hanging it.
pub async fn recv<T>(rx: &flume::Receiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv_async())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Waits until every actor in the system has closed and deregistered.
pub async fn wait_drained(system: &System) {
    tokio::time::timeout(WAIT, async {
        while system.actor_count() > 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("actors did not drain");
}

pub fn downcast<T: 'static>(data: BoxedMessage) -> T {
    *data.downcast::<T>().ok().expect("unexpected reply payload type")
}

/// Kick message for [`Caller`].
pub struct Go;

/// One-shot actor running an arbitrary closure inside a real actor context,
/// triggered by [`Go`]. Keeps tests from declaring a driver type apiece.
pub struct Caller {
    action: Option<Box<dyn FnOnce(&mut Caller, &mut Context<Caller>) + Send>>,
}

pub fn caller(f: impl FnOnce(&mut Caller, &mut Context<Caller>) + Send + 'static) -> Caller {
    Caller {
        action: Some(Box::new(f)),
    }
}

impl Actor for Caller {
    fn make_behaviour(&mut self, _ctx: &mut Context<Self>) -> Behaviour<Self> {
        let mut behaviour = Behaviour::new();
        behaviour.name("caller");
        behaviour.add_message(|me: &mut Caller, ctx, _msg: Go| {
            if let Some(action) = me.action.take() {
                action(me, ctx);
            }
        });
        behaviour
    }
}
