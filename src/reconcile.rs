//! The per-light leadership state machine.
//!
//! A bulb can be changed from two sides: mesh commands arrive from the hub,
//! and the bulb itself may be changed by its own app or remote. The
//! [`Reconciler`] decides which side is authoritative at any moment and
//! what the worker has to do on each tick. It never touches the network;
//! the bridge carries out the [`TickPlan`] it returns.

use std::time::Duration;

use log::{debug, info};
use serde::Serialize;
use strum_macros::Display;

use crate::cache::LightSettings;
use crate::config::Features;
use crate::mesh::{ColorMode, LightChange, MeshAttributes};
use crate::options::Timings;
use crate::runtime::Instant;
use crate::status::DeviceState;
use crate::types::{Brightness, Color, Mireds};

/// Which side is the source of truth for a light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum LeaderMode {
    /// The bulb leads; the bridge follows it with periodic reads.
    WizLeader,
    /// A mesh command arrived recently; the bridge keeps writing it to the bulb.
    HueLeader,
    /// A read is in flight. Mesh commands are dropped until it finishes.
    InSync,
}

/// The light as both sides should see it.
///
/// `color` and `mireds` are never both set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MirrorState {
    pub on: bool,
    /// Mesh level, 0-255.
    pub level: u8,
    pub color: Option<Color>,
    pub mireds: Option<Mireds>,
}

/// What the worker has to do this tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickPlan {
    /// State to write to the bulb.
    pub write: Option<DeviceState>,
    /// Whether to read the bulb. The reconciler is in
    /// [`LeaderMode::InSync`] until [`Reconciler::finish_sync`] is called.
    pub read: bool,
    /// Settings to persist, with the revision to acknowledge once saved.
    pub save: Option<(LightSettings, u64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Intervals {
    leader_timeout: Duration,
    read_interval: Duration,
    resend_interval: Duration,
    save_interval: Duration,
}

/// Mirror state and leadership of one light.
#[derive(Debug, Clone)]
pub struct Reconciler {
    features: Features,
    intervals: Intervals,
    mirror: MirrorState,
    prev_color: Color,
    prev_mireds: u16,
    mode: LeaderMode,
    leader_since: Option<Instant>,
    last_async_update: Option<Instant>,
    last_read: Option<Instant>,
    last_send: Option<Instant>,
    last_save: Option<Instant>,
    pending_send: bool,
    pending_save: bool,
    revision: u64,
}

impl Reconciler {
    pub fn new(features: Features, timings: &Timings) -> Self {
        Reconciler {
            features,
            intervals: Intervals {
                leader_timeout: timings.leader_timeout,
                read_interval: timings.read_interval,
                resend_interval: timings.resend_interval,
                save_interval: timings.save_interval,
            },
            mirror: MirrorState::default(),
            prev_color: Color::default(),
            prev_mireds: 0,
            mode: LeaderMode::WizLeader,
            leader_since: None,
            last_async_update: None,
            last_read: None,
            last_send: None,
            last_save: None,
            pending_send: false,
            pending_save: false,
            revision: 0,
        }
    }

    pub fn mode(&self) -> LeaderMode {
        self.mode
    }

    pub fn mirror(&self) -> &MirrorState {
        &self.mirror
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn pending_send(&self) -> bool {
        self.pending_send
    }

    pub fn pending_save(&self) -> bool {
        self.pending_save
    }

    /// Apply a command from the mesh side.
    ///
    /// Returns `false` if the command was dropped because a read is in
    /// flight.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::{Color, DeviceClass, Features, LeaderMode, LightChange, Reconciler, Timings};
    /// use wiz_hue_bridge::runtime::Instant;
    ///
    /// let mut light = Reconciler::new(Features::for_class(DeviceClass::Rgb), &Timings::default());
    /// let change = LightChange { on: true, color: Color::rgb(10, 20, 30), level: 200, mireds: 0, color_mode: None };
    /// assert!(light.apply_light_change(&change, Instant::now()));
    /// assert_eq!(light.mode(), LeaderMode::HueLeader);
    /// assert_eq!(light.mirror().color, Some(Color::rgb(10, 20, 30)));
    /// ```
    pub fn apply_light_change(&mut self, change: &LightChange, now: Instant) -> bool {
        if self.mode == LeaderMode::InSync {
            debug!("Dropping mesh command while syncing from the bulb");
            return false;
        }

        let (color_changed, mireds_changed) = match change.color_mode {
            Some(ColorMode::HueSaturation | ColorMode::Xy) => (true, false),
            Some(ColorMode::Temperature) => (false, true),
            None => (
                change.color != self.prev_color,
                change.mireds != self.prev_mireds,
            ),
        };
        self.prev_color = change.color;
        self.prev_mireds = change.mireds;

        if color_changed && self.features.color {
            self.mirror.color = Some(change.color);
            self.mirror.mireds = None;
        } else if mireds_changed
            && self.features.color_tmp
            && let Some(mireds) = Mireds::create(change.mireds)
        {
            self.mirror.mireds = Some(mireds);
            self.mirror.color = None;
        }
        self.mirror.on = change.on;
        self.mirror.level = change.level;

        self.pending_send = true;
        self.mark_dirty();

        match self.mode {
            LeaderMode::WizLeader => {
                info!("Mesh command received, mesh side now leads");
                self.mode = LeaderMode::HueLeader;
                self.leader_since = Some(now);
            }
            LeaderMode::HueLeader => self.leader_since = Some(now),
            LeaderMode::InSync => {}
        }
        true
    }

    /// Decide what the worker does at `now`.
    pub fn poll(&mut self, now: Instant) -> TickPlan {
        let mut plan = TickPlan::default();

        if self.mode == LeaderMode::HueLeader
            && self
                .leader_since
                .is_none_or(|t| now.duration_since(t) >= self.intervals.leader_timeout)
        {
            info!("No mesh command for {:?}, bulb side leads again", self.intervals.leader_timeout);
            self.mode = LeaderMode::WizLeader;
            self.leader_since = None;
        }

        match self.mode {
            LeaderMode::HueLeader => {
                let resend_due = self
                    .last_send
                    .is_none_or(|t| now.duration_since(t) >= self.intervals.resend_interval);
                if self.pending_send || resend_due {
                    plan.write = Some(self.outbound_state());
                    self.pending_send = false;
                    self.last_send = Some(now);
                }
            }
            LeaderMode::WizLeader => {
                if self.read_due(now) {
                    plan.read = true;
                    self.mode = LeaderMode::InSync;
                    self.last_read = Some(now);
                }
            }
            LeaderMode::InSync => {}
        }

        if self.pending_save
            && self
                .last_save
                .is_none_or(|t| now.duration_since(t) >= self.intervals.save_interval)
        {
            plan.save = Some((self.settings(), self.revision));
        }

        plan
    }

    fn read_due(&self, now: Instant) -> bool {
        let quiet = |t: Option<Instant>| {
            t.is_none_or(|t| now.duration_since(t) >= self.intervals.read_interval)
        };
        quiet(self.last_async_update) && quiet(self.last_read)
    }

    /// Finish a read started by [`Reconciler::poll`].
    ///
    /// A valid state becomes the new mirror and the attributes to push to
    /// the mesh are returned. Either way the bulb side leads again.
    pub fn finish_sync(&mut self, state: &DeviceState, now: Instant) -> Option<MeshAttributes> {
        if self.mode == LeaderMode::InSync {
            self.mode = LeaderMode::WizLeader;
        }
        if !state.is_valid {
            return None;
        }
        self.last_async_update = Some(now);
        self.apply_bulb_state(state);
        Some(self.attributes())
    }

    /// Handle a state the bulb pushed on its own.
    ///
    /// The push postpones the next periodic read. It only changes the
    /// mirror while the bulb side leads.
    pub fn apply_bulb_push(&mut self, state: &DeviceState, now: Instant) -> Option<MeshAttributes> {
        self.last_async_update = Some(now);
        if self.mode != LeaderMode::WizLeader {
            debug!("Ignoring bulb push in {}", self.mode);
            return None;
        }
        self.apply_bulb_state(state);
        Some(self.attributes())
    }

    /// Take the state read when the bridge starts.
    pub fn seed(&mut self, state: &DeviceState, now: Instant) -> MeshAttributes {
        self.last_async_update = Some(now);
        self.apply_bulb_state(state);
        self.prev_color = self.mirror.color.unwrap_or_default();
        self.prev_mireds = self.mirror.mireds.map_or(0, |m| m.mireds());
        self.attributes()
    }

    /// Take persisted settings when the bridge starts.
    ///
    /// The restored state is the last one commanded from the mesh, so the
    /// mesh side leads: the first tick writes it to the bulb, and the bulb
    /// is only read again once leadership lapses and a full read interval
    /// has passed.
    pub fn restore(&mut self, settings: &LightSettings, now: Instant) -> MeshAttributes {
        self.mirror = MirrorState {
            on: settings.state,
            level: settings.level,
            color: Color::from_channels(settings.r, settings.g, settings.b),
            mireds: settings.temperature.and_then(Mireds::create),
        };
        if self.mirror.color.is_some() {
            self.mirror.mireds = None;
        }
        self.prev_color = self.mirror.color.unwrap_or_default();
        self.prev_mireds = self.mirror.mireds.map_or(0, |m| m.mireds());
        self.mode = LeaderMode::HueLeader;
        self.leader_since = Some(now);
        self.last_read = Some(now);
        self.pending_send = true;
        self.attributes()
    }

    fn apply_bulb_state(&mut self, state: &DeviceState) {
        let before = self.mirror;
        self.mirror.on = state.state;
        if let Some(brightness) = state.brightness() {
            self.mirror.level = brightness.to_level();
        }
        self.mirror.color = state.color().map(|c| c.mesh_round_trip());
        self.mirror.mireds = if self.mirror.color.is_some() {
            None
        } else {
            state.kelvin().map(|k| k.to_mireds())
        };
        if self.mirror != before {
            self.mark_dirty();
        }
    }

    fn mark_dirty(&mut self) {
        self.pending_save = true;
        self.revision += 1;
    }

    /// Acknowledge a save of the settings at `revision`.
    ///
    /// Changes made after that snapshot keep the save pending.
    pub fn settings_saved(&mut self, revision: u64, now: Instant) {
        self.last_save = Some(now);
        if revision == self.revision {
            self.pending_save = false;
        }
    }

    /// Record a failed save so the retry waits a full save interval.
    pub fn save_failed(&mut self, now: Instant) {
        self.last_save = Some(now);
    }

    pub fn settings(&self) -> LightSettings {
        LightSettings {
            state: self.mirror.on,
            r: self.mirror.color.map(|c| c.red()),
            g: self.mirror.color.map(|c| c.green()),
            b: self.mirror.color.map(|c| c.blue()),
            level: self.mirror.level,
            temperature: self.mirror.mireds.map(|m| m.mireds()),
        }
    }

    /// The attributes to publish on the mesh side.
    ///
    /// Color wins over temperature, and each is only published if the bulb
    /// supports it.
    pub fn attributes(&self) -> MeshAttributes {
        let mut attrs = MeshAttributes {
            on: self.mirror.on,
            level: self.features.brightness.then_some(self.mirror.level),
            color: None,
            mireds: None,
            color_mode: None,
        };
        if self.features.color && self.mirror.color.is_some() {
            attrs.color = self.mirror.color;
            attrs.color_mode = Some(ColorMode::Xy);
        } else if self.features.color_tmp && self.mirror.mireds.is_some() {
            attrs.mireds = self.mirror.mireds;
            attrs.color_mode = Some(ColorMode::Temperature);
        }
        attrs
    }

    /// The state to write to the bulb.
    ///
    /// A light that is off only gets `state`. Otherwise brightness is
    /// converted to dimming and either the color or the temperature (in
    /// Kelvin, clamped into the bulb's range) is added.
    ///
    /// # Examples
    ///
    /// ```
    /// use wiz_hue_bridge::{Color, DeviceClass, Features, LightChange, Reconciler, Timings};
    /// use wiz_hue_bridge::runtime::Instant;
    ///
    /// let mut light = Reconciler::new(Features::for_class(DeviceClass::Tw), &Timings::default());
    /// let change = LightChange { on: true, color: Color::default(), level: 255, mireds: 500, color_mode: None };
    /// light.apply_light_change(&change, Instant::now());
    /// let state = light.outbound_state();
    /// assert_eq!(state.dimming, Some(100));
    /// assert_eq!(state.temp, Some(2700));
    /// ```
    pub fn outbound_state(&self) -> DeviceState {
        let mut state = DeviceState {
            state: self.mirror.on,
            ..DeviceState::default()
        };
        if !self.mirror.on {
            return state;
        }
        if self.features.brightness {
            state.dimming = Some(Brightness::from_level(self.mirror.level).value());
        }
        if self.features.color && self.mirror.color.is_some() {
            state.set_color(self.mirror.color);
        } else if self.features.color_tmp
            && let Some(mireds) = self.mirror.mireds
        {
            let kelvin = self.features.kelvin_range.clamp(mireds.to_kelvin());
            state.temp = Some(kelvin.kelvin());
        }
        state
    }
}
