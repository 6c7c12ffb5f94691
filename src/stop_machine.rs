use cache_control::StopMachine;
use cpu_types::{CpuMask, LogicalCpu};
use log::debug;
use turn_lock::run_in_turns;

/// [`StopMachine`] with one thread per processor, taking turns in processor
/// order.
#[derive(Debug, Default, Clone, Copy)]
pub struct TurnStopMachine;

impl StopMachine for TurnStopMachine {
    fn stop_machine(&self, cpus: &CpuMask, f: &(dyn Fn(LogicalCpu) + Sync)) {
        debug!("stop machine on {}", cpus);
        let cpus: Vec<LogicalCpu> = cpus.iter().collect();
        run_in_turns(&cpus, |cpu| f(*cpu));
    }

    fn stop_machine_from_inactive_cpu(&self, cpus: &CpuMask, f: &(dyn Fn(LogicalCpu) + Sync)) {
        self.stop_machine(cpus, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn runs_every_processor_in_order() {
        let cpus: CpuMask = [5, 1, 3].into_iter().map(LogicalCpu::new).collect();
        let ran = Mutex::new(Vec::new());
        TurnStopMachine.stop_machine(&cpus, &|cpu| ran.lock().unwrap().push(cpu.index));
        assert_eq!(*ran.lock().unwrap(), [1, 3, 5]);
    }
}
