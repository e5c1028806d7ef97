use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Exp, Poisson};

use crate::tx_config::NodeConfig;
use crate::tx_interface::{
    seconds_to_millis, RelayMode, SimTime, EMISSION_WINDOW_SECONDS, MILLIS_PER_SECOND,
    TRANSACTION_RATES,
};

/// Exponentially distributed delay with the given mean, for Poisson processes
pub fn poisson_delay(mean: SimTime, rng: &mut StdRng) -> SimTime {
    if mean == 0 {
        return 0;
    }
    match Exp::new(1.0 / mean as f64) {
        Ok(exp) => exp.sample(rng).round() as SimTime,
        Err(_) => mean,
    }
}

enum Schedule {
    Disabled,
    Poisson {
        mean: SimTime,
    },
    /// Pre-drawn emission times for the current window, earliest last
    Emitter {
        rates: Vec<f64>,
        emitters: u32,
        window: usize,
        pending: Vec<SimTime>,
    },
}

/// Decides when the next local transaction is created
pub struct TransactionGenerator {
    schedule: Schedule,
    time_to_run: SimTime,
}

impl TransactionGenerator {
    pub fn from_config(config: &NodeConfig) -> Self {
        let schedule = match (config.mode, config.tx_interval_seconds) {
            (RelayMode::TxEmitter, _) => Schedule::Emitter {
                rates: TRANSACTION_RATES.to_vec(),
                emitters: config.tx_emitters.max(1),
                window: 0,
                pending: Vec::new(),
            },
            (RelayMode::Regular, Some(interval)) => Schedule::Poisson {
                mean: seconds_to_millis(interval),
            },
            // black holes and spies only listen
            _ => Schedule::Disabled,
        };
        Self {
            schedule,
            time_to_run: config.time_to_run(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            schedule: Schedule::Disabled,
            time_to_run: 0,
        }
    }

    pub fn poisson(mean: SimTime, time_to_run: SimTime) -> Self {
        Self {
            schedule: Schedule::Poisson { mean },
            time_to_run,
        }
    }

    pub fn emitter(rates: Vec<f64>, emitters: u32, time_to_run: SimTime) -> Self {
        Self {
            schedule: Schedule::Emitter {
                rates,
                emitters: emitters.max(1),
                window: 0,
                pending: Vec::new(),
            },
            time_to_run,
        }
    }

    /// Delay from `now` until the next transaction, or None once generation is over
    pub fn next_delay(&mut self, now: SimTime, rng: &mut StdRng) -> Option<SimTime> {
        let next = match &mut self.schedule {
            Schedule::Disabled => None,
            Schedule::Poisson { mean } if *mean == 0 => None,
            Schedule::Poisson { mean } => Some(now + poisson_delay(*mean, rng)),
            Schedule::Emitter {
                rates,
                emitters,
                window,
                pending,
            } => {
                // drop emission times the clock has already passed
                while pending.last().map_or(false, |&t| t < now) {
                    pending.pop();
                }
                while pending.is_empty() && *window < rates.len() {
                    *pending = draw_window(rates[*window], *emitters, *window, now, rng);
                    *window += 1;
                }
                pending.pop()
            }
        };

        match next {
            Some(at) if at < self.time_to_run => Some(at - now),
            _ => {
                self.schedule = Schedule::Disabled;
                None
            }
        }
    }
}

// Emission times inside window `index`, sorted so the earliest is popped first
fn draw_window(rate: f64, emitters: u32, index: usize, now: SimTime, rng: &mut StdRng) -> Vec<SimTime> {
    let window_len = EMISSION_WINDOW_SECONDS * MILLIS_PER_SECOND;
    let start = index as SimTime * window_len;
    let end = start + window_len;
    let lambda = rate * EMISSION_WINDOW_SECONDS as f64 / emitters as f64;

    let count = match Poisson::new(lambda) {
        Ok(poisson) => {
            let draw: f64 = poisson.sample(rng);
            draw as usize
        }
        Err(_) => 0,
    };

    let lo = start.max(now);
    if lo >= end {
        return Vec::new();
    }
    let mut times: Vec<SimTime> = (0..count).map(|_| rng.gen_range(lo..end)).collect();
    times.sort_unstable_by(|a, b| b.cmp(a));
    times
}
