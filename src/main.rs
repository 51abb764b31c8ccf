//! Firewatch: fire and hazard detection node
//!
//! Samples DS18B20 probes, a BME280 and two MQ gas sensors once per tick,
//! smooths every channel, classifies the hazard level, and reports status
//! records to an RS-485 master. NDJSON readings go to the USB console.

#![no_std]
#![no_main]

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use embassy_time::{Duration, Instant, Ticker, Timer};
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::delay::Delay;
use esp_hal::gpio::{DriveMode, Flex, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart};
use esp_storage::FlashStorage;

use firewatch::comm::{self, HalfDuplex, LineReader, RS485_BAUD};
use firewatch::defaults::{MAX_PROBES, REPORT_EVERY_TICKS, SAMPLE_INTERVAL_MS};
use firewatch::identity::{Identity, IdentityStore};
use firewatch::node::{NodeConfig, Reading, SensorNode};
use firewatch::onewire::{self, AddressString, OneWireBus, PinBus, RomAddress};
use firewatch::protocol::{self, DeviceMessage, HostCommand, MsgBuffer, MAX_MSG_LEN, VERSION};
use firewatch::board;

/// Commands accepted per tick; extras wait for the next poll
const MAX_PENDING_COMMANDS: usize = 4;

// ── One-wire timing guard ────────────────────────────────────────────

/// Runs each one-wire slot with interrupts masked so the microsecond
/// timings are not stretched.
struct Guarded<B>(B);

impl<B: OneWireBus> OneWireBus for Guarded<B> {
    type Error = B::Error;

    fn reset(&mut self) -> Result<bool, B::Error> {
        critical_section::with(|_| self.0.reset())
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), B::Error> {
        critical_section::with(|_| self.0.write_bit(bit))
    }

    fn read_bit(&mut self) -> Result<bool, B::Error> {
        critical_section::with(|_| self.0.read_bit())
    }
}

// ── Console output ───────────────────────────────────────────────────

fn emit(msg: &DeviceMessage) {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok();
    if let Some(len) = comm::serialize_message(msg, &mut buf) {
        buf.truncate(len);
        if let Ok(s) = core::str::from_utf8(&buf) {
            log::info!("{}", s.trim_end());
        }
    } else {
        log::warn!("Console message did not fit in {} bytes", MAX_MSG_LEN);
    }
}

fn uptime_ms() -> u32 {
    (Instant::now().as_millis() & 0xFFFF_FFFF) as u32
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(_spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Start the RTOS (timer + software interrupt)
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!("Firewatch v{} starting on {}", VERSION, board::BOARD_NAME);

    // ── Identity ────────────────────────────────────────────────────

    let flash = FlashStorage::new(peripherals.FLASH);
    let mut identity = Identity::load(IdentityStore::new(flash, board::IDENTITY_FLASH_OFFSET));

    // ── Gas sensors (ADC1) ──────────────────────────────────────────

    let mut adc_config = AdcConfig::new();
    let mut mq2 = adc_config.enable_pin(peripherals.GPIO36, Attenuation::_11dB);
    let mut mq7 = adc_config.enable_pin(peripherals.GPIO39, Attenuation::_11dB);
    let mut adc1 = Adc::new(peripherals.ADC1, adc_config);

    // ── BME280 ──────────────────────────────────────────────────────

    let mut delay = Delay::new();
    let mut bme = match I2c::new(peripherals.I2C0, I2cConfig::default()) {
        Ok(i2c) => {
            let i2c = i2c.with_sda(peripherals.GPIO21).with_scl(peripherals.GPIO22);
            let mut bme = bme280::i2c::BME280::new_primary(i2c);
            match bme.init(&mut delay) {
                Ok(()) => {
                    log::info!("BME280 ready at {:#04x}", board::BME280_ADDR);
                    Some(bme)
                }
                Err(e) => {
                    log::error!("BME280 init failed: {:?}", e);
                    None
                }
            }
        }
        Err(e) => {
            log::error!("I2C init failed: {:?}", e);
            None
        }
    };

    // ── DS18B20 probes ──────────────────────────────────────────────

    let mut ow_pin = Flex::new(peripherals.GPIO4);
    ow_pin.apply_output_config(
        &OutputConfig::default()
            .with_drive_mode(DriveMode::OpenDrain)
            .with_pull(Pull::None),
    );
    ow_pin.set_input_enable(true);
    ow_pin.set_output_enable(true);
    ow_pin.set_high();
    let mut ow = Guarded(PinBus::new(ow_pin, Delay::new()));

    let probes: heapless::Vec<RomAddress, MAX_PROBES> = match onewire::discover(&mut ow) {
        Ok(found) => found,
        Err(e) => {
            log::error!("One-wire search failed: {:?}", e);
            heapless::Vec::new()
        }
    };
    for (i, rom) in probes.iter().enumerate() {
        let mut addr = AddressString::new();
        rom.format(&mut addr);
        log::info!("Probe T{}: {}", i, addr);
    }
    if probes.is_empty() {
        log::warn!("No DS18B20 probes found, temperature rules disabled");
    }

    // ── RS-485 link ─────────────────────────────────────────────────

    let de = Output::new(peripherals.GPIO32, Level::Low, OutputConfig::default());
    let re = Output::new(peripherals.GPIO33, Level::Low, OutputConfig::default());
    let uart = Uart::new(
        peripherals.UART1,
        UartConfig::default().with_baudrate(RS485_BAUD),
    )
    .expect("UART init failed")
    .with_rx(peripherals.GPIO16)
    .with_tx(peripherals.GPIO17);

    let mut link = HalfDuplex::new(uart, de, re, Delay::new());
    if let Err(e) = link.begin() {
        log::error!("RS-485 init failed: {:?}", e);
    }
    let mut line_reader = LineReader::new();

    // ── Node ────────────────────────────────────────────────────────

    let config = NodeConfig::default();
    let mut node = SensorNode::new(config, probes.len()).expect("invalid filter windows");

    emit(&DeviceMessage::Boot {
        id: identity.id(),
        board: board::BOARD_NAME,
        version: VERSION,
        probes: probes.len() as u8,
        config: &config,
    });

    // First conversion; later ones are started at the end of each tick
    if !probes.is_empty() {
        if let Err(e) = onewire::start_conversion(&mut ow) {
            log::warn!("Probe conversion failed to start: {:?}", e);
        }
        Timer::after(Duration::from_millis(onewire::CONVERSION_TIME_MS)).await;
    }

    // ── Sampling loop ───────────────────────────────────────────────

    let mut ticker = Ticker::every(Duration::from_millis(SAMPLE_INTERVAL_MS));
    let mut tick: u32 = 0;

    loop {
        let mut reading = Reading::default();

        match nb::block!(adc1.read_oneshot(&mut mq2)) {
            Ok(raw) => reading.gas = Some(f32::from(raw)),
            Err(e) => log::warn!("MQ-2 read failed: {:?}", e),
        }
        match nb::block!(adc1.read_oneshot(&mut mq7)) {
            Ok(raw) => reading.co = Some(f32::from(raw)),
            Err(e) => log::warn!("MQ-7 read failed: {:?}", e),
        }

        if let Some(bme) = bme.as_mut() {
            match bme.measure(&mut delay) {
                Ok(m) => {
                    reading.humidity = Some(m.humidity);
                    reading.pressure = Some(m.pressure / 100.0);
                }
                Err(e) => log::warn!("BME280 read failed: {:?}", e),
            }
        }

        for (i, rom) in probes.iter().enumerate() {
            let value = match onewire::read_temperature(&mut ow, rom) {
                Ok(t) => Some(t),
                Err(e) => {
                    log::warn!("Probe T{} read failed: {:?}", i, e);
                    None
                }
            };
            let _ = reading.probes.push(value);
        }
        if !probes.is_empty() {
            if let Err(e) = onewire::start_conversion(&mut ow) {
                log::warn!("Probe conversion failed to start: {:?}", e);
            }
        }

        let snapshot = node.tick(&reading);
        emit(&DeviceMessage::Reading {
            id: identity.id(),
            snapshot: &snapshot,
            ts: uptime_ms(),
        });

        tick = tick.wrapping_add(1);
        if tick % REPORT_EVERY_TICKS == 0 {
            match protocol::format_status(identity.id(), &snapshot) {
                Ok(record) => {
                    if let Err(e) = link.send(record.as_bytes()) {
                        log::error!("RS-485 send failed: {:?}", e);
                    }
                }
                Err(_) => log::error!("Status record overflow"),
            }
        }

        // ── Master commands ─────────────────────────────────────────
        let mut pending: heapless::Vec<HostCommand, MAX_PENDING_COMMANDS> = heapless::Vec::new();
        let own_id = identity.id();
        let polled = link.poll_lines(&mut line_reader, |line| {
            if let Some(cmd) = comm::parse_command(line, own_id) {
                if pending.push(cmd).is_err() {
                    log::warn!("Command dropped, queue full");
                }
            }
        });
        if let Err(e) = polled {
            log::error!("RS-485 receive failed: {:?}", e);
        }

        for cmd in &pending {
            if let Some(reply) = comm::handle_command(cmd, &mut identity, &snapshot) {
                if let Err(e) = link.send(reply.as_bytes()) {
                    log::error!("RS-485 send failed: {:?}", e);
                }
            }
        }

        ticker.next().await;
    }
}
