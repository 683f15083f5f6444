//! Adaptive difficulty: a bounded scalar driven by recent gameplay KPIs
//! (time-to-kill, damage intake, potion usage, deaths).
//!
//! KPIs are folded into EMAs; a short kill-pressure window decides whether
//! pressure pushes the scalar up or down, and in the neutral state the
//! scalar converges back to 1.0 and snaps when close.

pub const MIN_SCALAR: f32 = 0.88;
pub const MAX_SCALAR: f32 = 1.12;

const TARGET_TTK_SECONDS: f32 = 6.0;

fn ema(prev: f32, sample: f32, alpha: f32, has_prev: bool) -> f32 {
    if has_prev {
        prev + alpha * (sample - prev)
    } else {
        sample
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveController {
    avg_ttk: f32,
    has_ttk: bool,
    dmg_intake_rate: f32,
    potion_rate: f32,
    death_rate: f32,
    scalar: f32,
    enabled: bool,
    time_since_last_kill: f32,
    recent_kill_pressure: f32,
    kill_event: bool,
}

impl Default for AdaptiveController {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveController {
    pub fn new() -> Self {
        Self {
            avg_ttk: 0.0,
            has_ttk: false,
            dmg_intake_rate: 0.0,
            potion_rate: 0.0,
            death_rate: 0.0,
            scalar: 1.0,
            enabled: true,
            time_since_last_kill: 1000.0,
            recent_kill_pressure: 0.0,
            kill_event: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Disabling snaps the stored scalar back to 1.0 immediately.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.scalar = 1.0;
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Applied scalar; always 1.0 while disabled.
    pub fn scalar(&self) -> f32 {
        if self.enabled {
            self.scalar
        } else {
            1.0
        }
    }

    pub fn avg_ttk(&self) -> f32 {
        self.avg_ttk
    }

    /// Fold an observed kill (time-to-kill in seconds) into the EMA and the
    /// short pressure window.
    pub fn submit_kill(&mut self, ttk_seconds: f32) {
        if ttk_seconds <= 0.0 {
            return;
        }
        self.avg_ttk = ema(self.avg_ttk, ttk_seconds, 0.20, self.has_ttk);
        self.has_ttk = true;
        self.time_since_last_kill = 0.0;
        self.recent_kill_pressure += 1.0;
        self.kill_event = true;
    }

    /// Player damage taken over an observation interval.
    pub fn submit_player_damage(&mut self, dmg: f32, interval_seconds: f32) {
        if dmg < 0.0 || interval_seconds <= 0.0 {
            return;
        }
        self.dmg_intake_rate = ema(self.dmg_intake_rate, dmg / interval_seconds, 0.10, true);
    }

    /// One potion event; decayed into a per-minute rate by the tick.
    pub fn submit_potion_used(&mut self) {
        self.potion_rate += 1.0;
    }

    /// One death event; decayed into a per-hour rate by the tick.
    pub fn submit_player_death(&mut self) {
        self.death_rate += 1.0;
    }

    /// Periodic update. Decays counters, evaluates pressure inside the
    /// 5-second kill window, and moves the scalar toward its target.
    pub fn tick(&mut self, dt_seconds: f32) {
        if dt_seconds <= 0.0 {
            return;
        }
        if !self.enabled {
            self.scalar = 1.0;
            return;
        }
        self.time_since_last_kill += dt_seconds;
        let pot_alpha = (dt_seconds / 60.0).min(1.0);
        self.potion_rate = ema(self.potion_rate, 0.0, pot_alpha, true);
        let death_alpha = (dt_seconds / 3600.0).min(1.0);
        self.death_rate = ema(self.death_rate, 0.0, death_alpha, true);
        if self.recent_kill_pressure > 0.0 {
            let decay = (dt_seconds / 5.0).min(1.0);
            self.recent_kill_pressure = (self.recent_kill_pressure - decay).max(0.0);
        }

        let mut increase_pressure = false;
        let mut decrease_pressure = false;
        let active_window = self.time_since_last_kill < 5.0;
        let kill_event = std::mem::take(&mut self.kill_event);
        if active_window && kill_event {
            if self.has_ttk {
                if self.avg_ttk < TARGET_TTK_SECONDS * 0.60
                    && self.dmg_intake_rate < 3.0
                    && self.potion_rate < 0.2
                {
                    increase_pressure = true;
                }
                if self.avg_ttk > TARGET_TTK_SECONDS * 1.60
                    || self.dmg_intake_rate > 12.0
                    || self.potion_rate > 1.2
                    || self.death_rate > 0.15
                {
                    decrease_pressure = true;
                }
            }
        } else if self.has_ttk {
            // Idle: relax avg_ttk toward target so stale fast-kill pressure
            // cannot linger.
            let relax_alpha = (self.time_since_last_kill / 30.0).min(1.0) * 0.15;
            self.avg_ttk += (TARGET_TTK_SECONDS - self.avg_ttk) * relax_alpha;
        }

        let target = if increase_pressure {
            MAX_SCALAR
        } else if decrease_pressure {
            MIN_SCALAR
        } else {
            1.0
        };
        self.scalar += (target - self.scalar) * 0.05;
        if !increase_pressure && !decrease_pressure {
            self.scalar += (1.0 - self.scalar) * 0.30;
            if (self.scalar - 1.0).abs() < 0.002 {
                self.scalar = 1.0;
            }
        }
        self.scalar = self.scalar.clamp(MIN_SCALAR, MAX_SCALAR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_controller_is_neutral() {
        let mut a = AdaptiveController::new();
        a.submit_kill(0.5);
        a.tick(0.1);
        a.set_enabled(false);
        assert_eq!(a.scalar(), 1.0);
        a.tick(1.0);
        assert_eq!(a.scalar(), 1.0);
    }

    #[test]
    fn fast_kills_raise_the_scalar() {
        let mut a = AdaptiveController::new();
        for _ in 0..50 {
            a.submit_kill(1.0);
            a.tick(0.5);
        }
        assert!(a.scalar() > 1.0);
        assert!(a.scalar() <= MAX_SCALAR);
    }

    #[test]
    fn slow_kills_lower_the_scalar() {
        let mut a = AdaptiveController::new();
        for _ in 0..50 {
            a.submit_kill(30.0);
            a.tick(0.5);
        }
        assert!(a.scalar() < 1.0);
        assert!(a.scalar() >= MIN_SCALAR);
    }

    #[test]
    fn potion_pressure_blocks_increase() {
        let mut fast = AdaptiveController::new();
        for _ in 0..50 {
            fast.submit_kill(1.0);
            for _ in 0..3 {
                fast.submit_potion_used();
            }
            fast.tick(0.5);
        }
        assert!(fast.scalar() <= 1.0);
    }

    #[test]
    fn neutral_state_converges_and_snaps_to_one() {
        let mut a = AdaptiveController::new();
        for _ in 0..50 {
            a.submit_kill(1.0);
            a.tick(0.5);
        }
        assert!(a.scalar() > 1.0);
        // No further kills: idle relaxation pulls back to exactly 1.0.
        for _ in 0..200 {
            a.tick(0.5);
        }
        assert_eq!(a.scalar(), 1.0);
    }

    #[test]
    fn scalar_stays_bounded() {
        let mut a = AdaptiveController::new();
        for _ in 0..500 {
            a.submit_kill(0.2);
            a.tick(0.1);
        }
        assert!(a.scalar() <= MAX_SCALAR);
        for _ in 0..500 {
            a.submit_kill(60.0);
            a.submit_player_death();
            a.tick(0.1);
        }
        assert!(a.scalar() >= MIN_SCALAR);
    }

    #[test]
    fn zero_dt_tick_is_ignored() {
        let mut a = AdaptiveController::new();
        let before = a.scalar();
        a.tick(0.0);
        a.tick(-1.0);
        assert_eq!(a.scalar(), before);
    }
}
