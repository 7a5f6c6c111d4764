//! Two reactors bouncing events off each other. Run with `RUST_LOG=debug`
//! (or `trace`) to watch the kernel at work.
use eos_kernel::{actor::EVENT_ENTER, Event, Kernel, KernelCfg};
use eos_port_std::{Executor, StdPort};
use std::{cell::Cell, rc::Rc};

const ROUNDS: u32 = 1_000;

fn main() {
    env_logger::init();

    let rounds = Rc::new(Cell::new(0u32));
    let mut ex = Executor::new(KernelCfg::new().preemptive(true));

    ex.spawn_reactor("ping", 2, {
        let rounds = Rc::clone(&rounds);
        move |k: &mut Kernel<StdPort>, e: &Event| {
            if e.is(EVENT_ENTER) || (e.is("Pong") && rounds.get() < ROUNDS) {
                if let Err(e) = k.send("pong", "Ping") {
                    log::warn!("ping: {e:?}");
                }
            }
        }
    })
    .expect("can't start `ping`");
    ex.spawn_reactor("pong", 1, {
        let rounds = Rc::clone(&rounds);
        move |k: &mut Kernel<StdPort>, e: &Event| {
            if e.is("Ping") {
                rounds.set(rounds.get() + 1);
                if let Err(e) = k.send("ping", "Pong") {
                    log::warn!("pong: {e:?}");
                }
            }
        }
    })
    .expect("can't start `pong`");

    ex.run_for(1_000);

    let port = ex.kernel().port();
    log::info!(
        "{} rounds, {} context switches, {} idle passes",
        rounds.get(),
        port.switch_count(),
        port.idle_count()
    );
}
