#![no_main]
#![no_std]
// Ground-control handset firmware binary: owns every peripheral and
// drives `talon`'s hardware-agnostic state machines from ISRs and the
// 50 Hz heartbeat. No flight-control logic lives here — this crate flies
// nothing, it just hands the sticks and buttons to whatever vehicle is
// paired, and shows the vehicle's telemetry back to the user.

use cfg_if::cfg_if;
use cortex_m::asm;
use defmt_rtt as _;
use panic_probe as _;

use stm32_hal2::{
    adc::{Adc, AdcConfig, AdcDevice},
    clocks::{Clocks, InputSrc, PllSrc},
    dma::{ChannelCfg, Dma},
    flash::Flash,
    gpio::{Edge, Pin, Port, PinMode, Pull},
    pac::{self, ADC1, DMA1, USART1},
    timer::{Timer, TimerConfig, TimerInterrupt},
    usart::{Usart, UsartConfig, UsartInterrupt},
};

use talon::adc::{self as adcmap, NUM_ADC_CHANNELS};
use talon::battery::BatteryManager;
use talon::board::{ButtonId, StickId, NUM_BUTTONS, NUM_STICKS, PARAMS_FLASH_PAGE};
use talon::button::ButtonState;
use talon::button_dispatch::{self, Handlers, OutboundQueue};
use talon::dispatch::{Dispatcher, Task};
use talon::error::Error;
use talon::flight_link::{CommandId, CommandPayload};
use talon::gimbal::GimbalController;
use talon::haptic::{BuzzerState, HapticAction, HapticPlayer, Pattern};
use talon::link::proto::{self, Tag};
use talon::link::{self, HostLink, RxRing, TxProducers, MAX_FRAME_PAYLOAD, RX_RING_CAPACITY};
use talon::pairing::PairingSession;
use talon::params::{NvFlash, ParamsStore};
use talon::ring::RingBuffer;
use talon::policy::{IdleAction, IdleTimeout, Lockout, ManualOverride};
use talon::power::{BootAction, PowerManager, ResetCause, SysState};
use talon::stick::{AxisCalibration, StickAxis};
use talon::time::Tick;
use talon::ui::{UiEvent, UiEventQueue};

cfg_if! {
    if #[cfg(feature = "bb02")] {
        const BUTTON_PORT: Port = Port::B;
        const BUTTON_PINS: [u8; NUM_BUTTONS] = [0, 1, 2, 3, 4, 5, 6, 7, 8];
    } else {
        // `dvt` (default board revision).
        const BUTTON_PORT: Port = Port::C;
        const BUTTON_PINS: [u8; NUM_BUTTONS] = [0, 1, 2, 3, 4, 5, 6, 7, 8];
    }
}

const BUTTON_ORDER: [ButtonId; NUM_BUTTONS] = [
    ButtonId::Power,
    ButtonId::Fly,
    ButtonId::Rtl,
    ButtonId::Loiter,
    ButtonId::A,
    ButtonId::B,
    ButtonId::Preset1,
    ButtonId::Preset2,
    ButtonId::CameraClick,
];

/// Heartbeat tick rate: the underlying timer fires at 1 kHz, one
/// `Tick::add(1)` per interrupt; the 50 Hz logical heartbeat is every
/// 20th of those (`HEARTBEAT_DIVIDER`).
const TICK_RATE_HZ: u32 = 1_000;
const HEARTBEAT_DIVIDER: u32 = TICK_RATE_HZ / talon::policy::HEARTBEAT_HZ;

/// Magic value stashed in the RTC backup register across a software
/// reset to tell the next boot to skip the battery-check screen (spec.md
/// §4.12's bootloader/UART-wakeup path).
const UART_WAKEUP_KEY: u32 = 0x8765;

/// Dispatcher is reached from every ISR and from `#[idle]`; its own
/// atomics make that sound without an RTIC resource (component B).
static DISPATCHER: Dispatcher = Dispatcher::new();

/// Bounded queues are all lock-free ring buffers (component C) and so,
/// like `DISPATCHER`, live as statics rather than RTIC-locked resources.
static UI_EVENTS: UiEventQueue = UiEventQueue::new();
static RX_RING: RxRing = RxRing::new();
static OUTBOUND: OutboundQueue = OutboundQueue::new();

/// Raw `(button, event)` pairs produced by a button ISR, drained by the
/// `ButtonHold` task handler — ISRs only have the `buttons`/`tick`
/// resources locked, not the subscriber chain's resources (flight-link,
/// gimbal, pairing, manual-override), so the actual dispatch happens in
/// `#[idle]` where all of those are reachable.
static RAW_BUTTON_EVENTS: RingBuffer<(ButtonId, talon::button::ButtonEvent), 16> = RingBuffer::new();

/// Outgoing SLIP-framed bytes, drained by the USART TX-empty interrupt.
static TX_RING: RingBuffer<u8, RX_RING_CAPACITY> = RingBuffer::new();

struct FlashNv<'a>(&'a mut Flash);

impl NvFlash for FlashNv<'_> {
    fn read_page(&self, page: usize, out: &mut [u8]) -> Result<(), Error> {
        self.0.read(page, 0, out).map_err(|_| Error::BufferFull)
    }

    fn erase_write_page(&mut self, page: usize, data: &[u8]) -> Result<(), Error> {
        self.0.erase_write_page(page, data).map_err(|_| Error::BufferFull)
    }
}

#[rtic::app(device = pac, peripherals = false, dispatchers = [EXTI9_5])]
mod app {
    use super::*;

    #[shared]
    struct Shared {
        stick_axes: [StickAxis; NUM_STICKS],
        battery: BatteryManager,
        params: ParamsStore,
        flight_link: talon::flight_link::FlightLinkSession,
        pairing: PairingSession,
        gimbal: GimbalController,
        power: PowerManager,
        haptic: HapticPlayer,
        buzzer: BuzzerState,
        idle_timeout: IdleTimeout,
        manual_override: ManualOverride,
        lockout: Lockout,
        buttons: [ButtonState; NUM_BUTTONS],
        host_link: HostLink,
        adc_dma_buf: [i16; NUM_ADC_CHANNELS],
        tick: Tick,
        flash: Flash,
        update_in_progress: bool,
        companion_connected: bool,
        power_button_held_long: bool,
        all_pressed_mask: u16,
        /// Last-sampled `(gimbal_y, gimbal_rate_dial)` pair, handed from
        /// the heartbeat's stick sampling to the `Camera` task — the two
        /// run as separate dispatcher tasks so the value can't just be a
        /// local in one of them.
        gimbal_axes: (f32, f32),
        /// Set when a `Shutdown` task ran but `PowerManager` vetoed the
        /// request; the heartbeat re-triggers `Task::Shutdown` each tick
        /// until the veto lifts.
        shutdown_pending: bool,
    }

    #[local]
    struct Local {
        adc1: Adc<ADC1>,
        dma1: Dma<DMA1>,
        usart1: Usart<USART1>,
        heartbeat_timer: Timer<pac::TIM6>,
        button_pins: [Pin; NUM_BUTTONS],
        heartbeat_divider_count: u32,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local, init::Monotonics) {
        let mut cp = cx.core;
        let dp = pac::Peripherals::take().unwrap();

        cp.SCB.enable_icache();

        let clock_cfg = Clocks {
            input_src: InputSrc::Pll(PllSrc::Hse(8_000_000)),
            ..Default::default()
        };
        clock_cfg.setup().unwrap();

        let mut button_pins: [Pin; NUM_BUTTONS] =
            core::array::from_fn(|i| Pin::new(BUTTON_PORT, BUTTON_PINS[i], PinMode::Input));
        for pin in button_pins.iter_mut() {
            pin.pull(Pull::Up);
            pin.enable_interrupt(Edge::Both);
        }

        let mut dma1 = Dma::new(dp.DMA1);

        let adc_cfg = AdcConfig::default();
        let mut adc1 = Adc::new_adc1(dp.ADC1, AdcDevice::One, adc_cfg, &clock_cfg);
        adc1.enable_dma(ChannelCfg::default());

        let usart1 = Usart::new(dp.USART1, 115_200, UsartConfig::default(), &clock_cfg);
        // SAFETY: only touched here at init, before interrupts are unmasked.
        let mut usart1 = usart1;
        usart1.enable_interrupt(UsartInterrupt::ReadNotEmpty);

        let mut heartbeat_timer = Timer::new_tim6(dp.TIM6, TICK_RATE_HZ as f32, TimerConfig::default(), &clock_cfg);
        heartbeat_timer.enable_interrupt(TimerInterrupt::Update);
        heartbeat_timer.enable();

        let mut flash = Flash::new(dp.FLASH);

        let mut params = ParamsStore::new();
        {
            let nv = FlashNv(&mut flash);
            params.load(&nv, PARAMS_FLASH_PAGE);
        }

        let stick_axes: [StickAxis; NUM_STICKS] = core::array::from_fn(|i| {
            let cal = params.params().stick_cal[i];
            let cfg = params.params().stick_cfg[i];
            StickAxis::new(
                AxisCalibration { min: cal.min, trim: cal.trim, max: cal.max },
                20,
                cfg.expo,
                50,
                cfg.reversed,
            )
        });

        // The RTC backup register survives a software reset; a bootloader
        // jump or a UART-wakeup-tagged reset both skip the battery-check
        // screen (spec.md §4.12).
        let backup_reg = unsafe { (*pac::RTC::ptr()).bkpr[0].read().bits() };
        let reset_cause = if backup_reg == UART_WAKEUP_KEY {
            ResetCause::SkipBootCheck
        } else {
            ResetCause::Normal
        };

        let mut power = PowerManager::new();
        let boot_action = power.begin_boot(Tick::ZERO, reset_cause, false, false);
        if boot_action == BootAction::EnterRunning {
            power.enter_running();
        }

        (
            Shared {
                stick_axes,
                battery: BatteryManager::new(),
                params,
                flight_link: talon::flight_link::FlightLinkSession::new(),
                pairing: PairingSession::new(),
                gimbal: GimbalController::new(),
                power,
                haptic: HapticPlayer::new(),
                buzzer: BuzzerState::new(),
                idle_timeout: IdleTimeout::new(),
                manual_override: ManualOverride::new(),
                lockout: Lockout::new(),
                buttons: [ButtonState::new(); NUM_BUTTONS],
                host_link: HostLink::new(),
                adc_dma_buf: [0i16; NUM_ADC_CHANNELS],
                tick: Tick::ZERO,
                flash,
                update_in_progress: false,
                companion_connected: false,
                power_button_held_long: false,
                all_pressed_mask: 0,
                gimbal_axes: (0.0, 0.0),
                shutdown_pending: false,
            },
            Local {
                adc1,
                dma1,
                usart1,
                heartbeat_timer,
                button_pins,
                heartbeat_divider_count: 0,
            },
            init::Monotonics(),
        )
    }

    /// Cooperative dispatcher loop (component B): no preemption, a
    /// handler always runs to completion before the next task class is
    /// serviced, even one re-triggered during the handler itself.
    #[idle(shared = [
        stick_axes, battery, params, flight_link, pairing, gimbal, power, haptic, buzzer,
        idle_timeout, manual_override, lockout, buttons, host_link, adc_dma_buf, tick, flash,
        update_in_progress, companion_connected, power_button_held_long, all_pressed_mask,
        gimbal_axes,
    ], local = [])]
    fn idle(mut cx: idle::Context) -> ! {
        loop {
            let ran = DISPATCHER.work(|task| match task {
                Task::Shutdown => handle_shutdown(&mut cx.shared),
                Task::Camera => handle_camera(&mut cx.shared),
                Task::Haptic => handle_haptic(&mut cx.shared),
                Task::ButtonHold => handle_button_hold(&mut cx.shared),
                Task::DisplayRender => handle_display_render(&mut cx.shared),
                Task::FiftyHzHeartbeat => handle_heartbeat(&mut cx.shared),
                Task::HostProtocol => handle_host_protocol(&mut cx.shared),
            });
            if !ran && DISPATCHER.is_empty() {
                asm::wfi();
            }
        }
    }

    /// One bound ISR per GPIO edge group; each identifies which button
    /// moved by re-reading its pin level (hardware is debounced enough
    /// that no software filtering runs here, per spec.md §4.6).
    #[task(binds = EXTI0, shared = [buttons, tick, all_pressed_mask, power], local = [button_pins])]
    fn button_edge(mut cx: button_edge::Context) {
        for (i, pin) in cx.local.button_pins.iter_mut().enumerate() {
            if !pin.check_interrupt() {
                continue;
            }
            pin.clear_interrupt();
            let pressed = pin.is_low(); // active-low, per the board's pull-up wiring
            let button = BUTTON_ORDER[i];
            let now = cx.shared.tick.lock(|t| *t);
            let events = cx.shared.buttons.lock(|buttons| {
                if pressed {
                    buttons[i].press(now)
                } else {
                    buttons[i].release(now)
                }
            });
            cx.shared.all_pressed_mask.lock(|mask| {
                if pressed {
                    *mask |= 1 << (button as u16);
                } else {
                    *mask &= !(1 << (button as u16));
                }
            });
            if button == ButtonId::Power {
                if pressed {
                    if cx.shared.power.lock(|p| p.on_power_button_press_while_idle()) {
                        cortex_m::peripheral::SCB::sys_reset();
                    }
                } else {
                    cx.shared.power.lock(|p| p.note_power_button_released(now));
                }
            }
            for event in events {
                RAW_BUTTON_EVENTS.enqueue((button, event));
            }
            DISPATCHER.trigger(Task::ButtonHold);
        }
    }

    #[task(binds = ADC1_2, shared = [adc_dma_buf])]
    fn adc_complete(mut cx: adc_complete::Context) {
        // The real DMA-complete ISR fills `adc_dma_buf` via the DMA
        // controller directly; this entry point just acknowledges the
        // peripheral interrupt and wakes the heartbeat's sampling step.
        cx.shared.adc_dma_buf.lock(|_buf| {});
        DISPATCHER.trigger(Task::FiftyHzHeartbeat);
    }

    #[task(binds = USART1, shared = [host_link])]
    fn host_uart(mut cx: host_uart::Context) {
        // SAFETY: single producer (this ISR) into `RX_RING`; single
        // consumer (this ISR) of `TX_RING`.
        let pac_usart1 = unsafe { &*USART1::ptr() };
        let sr = pac_usart1.isr.read();
        if sr.ore().bit_is_set() || sr.fe().bit_is_set() {
            cx.shared.host_link.lock(|link| link.note_line_error());
        }
        if sr.rxne().bit_is_set() {
            let byte = pac_usart1.rdr.read().rdr().bits() as u8;
            RX_RING.enqueue(byte);
            DISPATCHER.trigger(Task::HostProtocol);
        }
        if sr.txe().bit_is_set() {
            match TX_RING.dequeue() {
                Some(byte) => pac_usart1.tdr.write(|w| w.tdr().bits(byte as u16)),
                None => pac_usart1.cr1.modify(|_, w| w.txeie().clear_bit()),
            }
        }
    }

    #[task(binds = TIM6_DAC, local = [heartbeat_timer, heartbeat_divider_count], shared = [tick])]
    fn tick_isr(mut cx: tick_isr::Context) {
        cx.local.heartbeat_timer.clear_interrupt(TimerInterrupt::Update);
        cx.shared.tick.lock(|t| *t = t.add(1));

        *cx.local.heartbeat_divider_count += 1;
        if *cx.local.heartbeat_divider_count >= HEARTBEAT_DIVIDER {
            *cx.local.heartbeat_divider_count = 0;
            DISPATCHER.trigger(Task::FiftyHzHeartbeat);
        }
        DISPATCHER.trigger(Task::ButtonHold);
    }
}

/// Route one button event through the fixed subscriber chain
/// (component I). Each closure closes over exactly the `Shared`
/// resource its subscriber needs, matching the chain order in
/// `button_dispatch::CHAIN`.
fn dispatch_one(shared: &mut app::idle::SharedResources<'_>, button: ButtonId, event: talon::button::ButtonEvent) {
    use talon::button::ButtonEvent;

    let mask = shared.all_pressed_mask.lock(|m| *m);

    shared.idle_timeout.lock(|it| it.on_button_event(button, event));
    shared.idle_timeout.lock(|it| {
        if event == ButtonEvent::Press {
            it.reset();
        }
    });
    shared.manual_override.lock(|mo| mo.on_button_event(button, event));
    let override_engaged = shared.manual_override.lock(|mo| mo.is_enabled());

    if button == ButtonId::Power {
        let held = matches!(event, ButtonEvent::Hold | ButtonEvent::LongHold);
        if held || matches!(event, ButtonEvent::Release | ButtonEvent::LongHoldRelease | ButtonEvent::ClickRelease) {
            shared.power_button_held_long.lock(|h| *h = held);
        }
    }

    let mut pairing = |b: ButtonId, e: ButtonEvent| shared.pairing.lock(|p| p.on_button_event(b, e));

    let mut manual_override_sub = |b: ButtonId, e: ButtonEvent| {
        let triggers_alt_hold = shared.manual_override.lock(|mo| mo.on_button_event_for_dispatch(b, e));
        if triggers_alt_hold {
            shared.flight_link.lock(|fl| {
                fl.post_command(CommandId::SetFlightMode, CommandPayload::FlightMode(talon::policy::ALT_HOLD_MODE));
            });
        }
        triggers_alt_hold
    };

    let mut flight_link = |b: ButtonId, e: ButtonEvent| match (b, e) {
        (ButtonId::Fly, ButtonEvent::ClickRelease) => {
            shared.flight_link.lock(|fl| fl.post_command(CommandId::FlyButtonClick, CommandPayload::None))
        }
        (ButtonId::Fly, ButtonEvent::LongHold) => {
            shared.flight_link.lock(|fl| fl.post_command(CommandId::FlyButtonHold, CommandPayload::None))
        }
        _ => false,
    };

    let mut camera = |b: ButtonId, e: ButtonEvent| {
        let rate_dial = shared.gimbal_axes.lock(|axes| axes.1);
        match (b, e) {
            (ButtonId::Preset1, ButtonEvent::ClickRelease) => {
                shared.gimbal.lock(|g| g.begin_preset(talon::gimbal::PresetId::Preset1, rate_dial));
                true
            }
            (ButtonId::Preset1, ButtonEvent::Hold) => {
                shared.gimbal.lock(|g| g.capture_preset(talon::gimbal::PresetId::Preset1));
                true
            }
            (ButtonId::Preset2, ButtonEvent::ClickRelease) => {
                shared.gimbal.lock(|g| g.begin_preset(talon::gimbal::PresetId::Preset2, rate_dial));
                true
            }
            (ButtonId::Preset2, ButtonEvent::Hold) => {
                shared.gimbal.lock(|g| g.capture_preset(talon::gimbal::PresetId::Preset2));
                true
            }
            _ => false,
        }
    };

    let mut ui_alerts = |b: ButtonId, e: ButtonEvent| {
        let denied = !shared.lockout.lock(|l| l.is_unlocked()) && matches!(e, ButtonEvent::ClickRelease);
        if denied {
            UI_EVENTS.post(UiEvent::ButtonDenied(b));
        }
        denied
    };

    let mut handlers = Handlers {
        flight_link: &mut flight_link,
        camera: &mut camera,
        ui_alerts: &mut ui_alerts,
        pairing: &mut pairing,
        manual_override: &mut manual_override_sub,
    };
    button_dispatch::dispatch(button, event, mask, &mut handlers, &OUTBOUND, override_engaged);
}

fn handle_shutdown(shared: &mut app::idle::SharedResources<'_>) {
    let now = shared.tick.lock(|t| *t);
    let update_in_progress = shared.update_in_progress.lock(|u| *u);
    let companion_connected = shared.companion_connected.lock(|c| *c);
    let accepted = shared.power.lock(|power| power.request_shutdown(now, update_in_progress, companion_connected));
    if !accepted {
        // Vetoed (mid-update, or companion hasn't reported in yet): try
        // again next heartbeat instead of dropping the request.
        shared.shutdown_pending.lock(|p| *p = true);
        return;
    }
    shared.shutdown_pending.lock(|p| *p = false);
    shared.power.lock(|power| power.shutdown_sequence_complete());
    UI_EVENTS.post(UiEvent::SystemShutdown);
}

fn handle_camera(shared: &mut app::idle::SharedResources<'_>) {
    let now = shared.tick.lock(|t| *t);
    let (gimbal_y, gimbal_rate) = shared.gimbal_axes.lock(|axes| *axes);
    let hit_limit = shared.gimbal.lock(|g| g.tick(now, gimbal_y, gimbal_rate));
    if hit_limit {
        shared.haptic.lock(|h| {
            h.start(Pattern::SingleShort, true);
        });
        DISPATCHER.trigger(Task::Haptic);
    }
}

fn handle_haptic(shared: &mut app::idle::SharedResources<'_>) {
    let now = shared.tick.lock(|t| *t);
    let action = shared.haptic.lock(|h| h.poll(now));
    match action {
        HapticAction::Wait => {}
        HapticAction::SetMotor { on: _, deadline: _ } => {
            // main.rs's board-wiring layer drives the motor GPIO here;
            // the desired level/deadline has already been computed above.
            DISPATCHER.trigger(Task::Haptic);
        }
        HapticAction::Stopped => {}
    }
}

fn handle_button_hold(shared: &mut app::idle::SharedResources<'_>) {
    // Two sources feed the same subscriber chain: edges the ISR already
    // recorded (`RAW_BUTTON_EVENTS`) and hold-thresholds crossed by
    // buttons still down right now. Both are collected into a small
    // fixed buffer first so the dispatch loop below can take `shared`
    // by unique reference without also holding the `buttons` lock.
    let mut pending: heapless::Vec<(ButtonId, talon::button::ButtonEvent), 16> = heapless::Vec::new();

    while let Some(pair) = RAW_BUTTON_EVENTS.dequeue() {
        let _ = pending.push(pair);
    }

    let now = shared.tick.lock(|t| *t);
    let mut any_held = false;
    shared.buttons.lock(|buttons| {
        for (i, button) in buttons.iter_mut().enumerate() {
            if !button.is_pressed() {
                continue;
            }
            any_held = true;
            for event in button.poll_hold(now) {
                let _ = pending.push((BUTTON_ORDER[i], event));
            }
        }
    });

    for (button, event) in pending {
        dispatch_one(shared, button, event);
    }

    if any_held {
        DISPATCHER.trigger(Task::ButtonHold);
    }
}

fn handle_display_render(_shared: &mut app::idle::SharedResources<'_>) {
    // Drains and renders `UI_EVENTS`; the display driver itself is board
    // wiring not modeled in this crate.
    while let Some(_event) = UI_EVENTS.pop() {
        // main.rs's display layer consumes `_event` here.
    }
}

fn handle_heartbeat(shared: &mut app::idle::SharedResources<'_>) {
    let now = shared.tick.lock(|t| *t);

    let (sticks, cells) = shared.adc_dma_buf.lock(|buf| adcmap::split_samples(buf));

    let mut any_newly_invalid = false;
    let mut gimbal_y = 0.0;
    let mut gimbal_rate = 0.0;
    shared.stick_axes.lock(|axes| {
        for (i, (axis, raw)) in axes.iter_mut().zip(sticks.values).enumerate() {
            let sample = axis.sample(raw);
            any_newly_invalid |= sample.newly_invalid;
            if i == StickId::GimbalPitch as usize {
                gimbal_y = talon::stick::gimbal_value_or_default(sample, 0.0);
            } else if i == StickId::GimbalRate as usize {
                gimbal_rate = talon::stick::gimbal_value_or_default(sample, 0.0);
            }
        }
    });
    if any_newly_invalid {
        UI_EVENTS.post(UiEvent::ControllerValueOutOfRange);
    }
    shared.gimbal_axes.lock(|axes| *axes = (gimbal_y, gimbal_rate));
    DISPATCHER.trigger(Task::Camera);

    if shared.power.lock(|p| p.state()) == SysState::Boot {
        let held_long = shared.power_button_held_long.lock(|h| *h);
        let companion_link_up = shared.companion_connected.lock(|c| *c);
        let boot_action = shared.power.lock(|p| p.poll_boot(now, held_long, companion_link_up));
        match boot_action {
            BootAction::EnterRunning => {
                shared.power.lock(|p| p.enter_running());
                UI_EVENTS.post(UiEvent::SystemEnteredRunningState);
            }
            BootAction::Shutdown => DISPATCHER.trigger(Task::Shutdown),
            BootAction::Continue => {}
        }
    }

    let gate = shared.battery.lock(|bm| bm.prep_to_sample());
    if gate.gate_open {
        let flags = shared.battery.lock(|bm| {
            bm.on_cell_samples(cells.bottom as i32, cells.top as i32, cells.thermistor as i32, cells.pack_id as i32, false)
        });
        if flags.charger_conn_changed {
            UI_EVENTS.post(UiEvent::ChargerConnChanged);
        }
        if flags.charger_connected {
            UI_EVENTS.post(UiEvent::ChargerConnected);
        }
        if flags.shutdown_needed {
            DISPATCHER.trigger(Task::Shutdown);
        }
    }

    let idle_events = shared.flight_link.lock(|fl| fl.check_liveness(now));
    for event in idle_events {
        UI_EVENTS.post(event);
    }

    let update_in_progress = shared.update_in_progress.lock(|u| *u);
    let flight_connected = shared.flight_link.lock(|fl| fl.connected());
    let idle_action = shared.idle_timeout.lock(|it| it.tick(update_in_progress, flight_connected));
    match idle_action {
        IdleAction::Warn => UI_EVENTS.post(UiEvent::SystemIdleWarning),
        IdleAction::Shutdown => DISPATCHER.trigger(Task::Shutdown),
        IdleAction::None => {}
    }

    (shared.params, shared.flash).lock(|params, flash| {
        let mut nv = FlashNv(flash);
        params.periodic_work(now, &mut nv, PARAMS_FLASH_PAGE);
    });

    if shared.shutdown_pending.lock(|p| *p) {
        DISPATCHER.trigger(Task::Shutdown);
    }

    DISPATCHER.trigger(Task::DisplayRender);
    DISPATCHER.trigger(Task::HostProtocol);
}

fn handle_host_protocol(shared: &mut app::idle::SharedResources<'_>) {
    let now = shared.tick.lock(|t| *t);
    let mut any_frame = false;
    shared.host_link.lock(|link| {
        link.drain_frames(&RX_RING, |tag, payload| {
            any_frame = true;
            match tag {
                Tag::Mavlink => {
                    if let Some((id, _framing)) = talon::flight_link::parse_message_id(payload) {
                        let events = shared.flight_link.lock(|fl| fl.on_message(id, payload, now));
                        for event in events {
                            UI_EVENTS.post(event);
                        }
                        if let Some(angle) = shared.flight_link.lock(|fl| fl.take_mount_angle()) {
                            shared.gimbal.lock(|g| g.on_vehicle_angle_report(now, angle));
                        }
                    }
                }
                Tag::PairRequest => {
                    let device_id = proto::read_device_id(payload);
                    let event = shared.pairing.lock(|p| p.on_pairing_request(device_id.as_str()));
                    UI_EVENTS.post(event);
                }
                Tag::PairResult => {
                    let device_id = proto::read_device_id(payload);
                    let event = shared.pairing.lock(|p| p.on_pairing_result(device_id.as_str()));
                    UI_EVENTS.post(event);
                }
                Tag::Calibrate => {
                    if let Some((raw_id, min, trim, max)) = proto::read_calibrate(payload) {
                        shared.stick_axes.lock(|axes| {
                            if let Some(axis) = axes.get_mut(raw_id as usize) {
                                axis.recalibrate(AxisCalibration { min, trim, max });
                            }
                        });
                        shared.params.lock(|p| p.mark());
                    }
                }
                Tag::ConfigSweepTime => {
                    if let Some((min_sec, max_sec)) = proto::read_sweep_time(payload) {
                        shared.gimbal.lock(|g| g.set_sweep_config(min_sec, max_sec));
                    }
                }
                Tag::SetShotInfo => {
                    if let Ok(name) = core::str::from_utf8(payload) {
                        shared.gimbal.lock(|g| g.set_shot_name(name));
                    }
                }
                Tag::LockoutState => {
                    if let Some(locked) = proto::read_bool(payload) {
                        let update_in_progress = shared.update_in_progress.lock(|u| *u);
                        if let Some(event) = shared.lockout.lock(|l| l.on_host_message(locked, update_in_progress)) {
                            UI_EVENTS.post(event);
                        }
                    }
                }
                Tag::ShutdownRequest => {
                    DISPATCHER.trigger(Task::Shutdown);
                }
                _ => {}
            }
        });
    });
    if any_frame {
        shared.companion_connected.lock(|c| *c = true);
    }

    poll_host_tx(shared);
}

/// Walk the fixed TX producer chain (component J) and, if any producer
/// had something to say, push its SLIP-framed bytes into `TX_RING` and
/// arm the USART's TX-empty interrupt.
fn poll_host_tx(shared: &mut app::idle::SharedResources<'_>) {
    let mut host_request_response = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;

    let mut button_event = |buf: &mut [u8; MAX_FRAME_PAYLOAD]| {
        let rec = OUTBOUND.dequeue()?;
        buf[0] = Tag::ButtonEvent as u8;
        let len = proto::write_button_event(rec.button as u8, rec.event as u8, rec.all_pressed_mask, &mut buf[1..]);
        Some(len + 1)
    };

    let mut input_report = |buf: &mut [u8; MAX_FRAME_PAYLOAD]| {
        let battery_pct = shared.battery.lock(|bm| talon::battery::to_display_scale(bm.reported_soc()));
        let (gimbal_y, gimbal_rate) = shared.gimbal_axes.lock(|axes| *axes);
        buf[0] = Tag::InputReport as u8;
        let len = proto::write_input_report(
            talon::stick::to_ppm(gimbal_y),
            talon::stick::to_ppm(gimbal_rate),
            battery_pct as u16,
            &mut buf[1..],
        );
        Some(len + 1)
    };

    let mut flight_link_command = |buf: &mut [u8; MAX_FRAME_PAYLOAD]| {
        let (id, payload) = shared.flight_link.lock(|fl| fl.produce())?;
        buf[0] = Tag::Mavlink as u8;
        buf[1] = id as u8;
        let value: i32 = match payload {
            CommandPayload::None => 0,
            CommandPayload::FlightMode(mode) => mode as i32,
            CommandPayload::Arm(arm) => arm as i32,
            CommandPayload::Waypoint(wp) => wp as i32,
        };
        buf[2..6].copy_from_slice(&value.to_le_bytes());
        Some(6)
    };

    let mut pair_confirm = |buf: &mut [u8; MAX_FRAME_PAYLOAD]| {
        let len = shared.pairing.lock(|p| p.produce_confirm().map(|id| proto::write_device_id(id, &mut buf[1..])))?;
        buf[0] = Tag::PairConfirm as u8;
        Some(len + 1)
    };

    let mut shutdown_notify = |buf: &mut [u8; MAX_FRAME_PAYLOAD]| {
        let due = shared.power.lock(|p| p.produce_shutdown_notify());
        if !due {
            return None;
        }
        buf[0] = Tag::ShutdownRequest as u8;
        Some(1)
    };

    let mut self_test = |_: &mut [u8; MAX_FRAME_PAYLOAD]| None;

    let mut producers = TxProducers {
        host_request_response: &mut host_request_response,
        button_event: &mut button_event,
        input_report: &mut input_report,
        flight_link_command: &mut flight_link_command,
        pair_confirm: &mut pair_confirm,
        shutdown_notify: &mut shutdown_notify,
        self_test: &mut self_test,
    };

    if let Some(framed) = link::poll_tx::<RX_RING_CAPACITY>(&mut producers) {
        for byte in framed {
            TX_RING.enqueue(byte);
        }
        // SAFETY: only this function arms TXEIE; the ISR disables it
        // again once `TX_RING` runs dry.
        unsafe {
            (*USART1::ptr()).cr1.modify(|_, w| w.txeie().set_bit());
        }
    }
}
