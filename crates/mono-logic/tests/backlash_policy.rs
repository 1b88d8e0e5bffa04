//! Integration tests for the backlash policies of the ASCII controllers,
//! driven through the `Monochromator` facade.
//!
//! The two controllers disagree: the FHR1000 driver pre-positions 5 nm below
//! a decreasing target and approaches it opening upward, while the SpectraPro
//! leaves compensation to its firmware and issues exactly one blocking query
//! whatever the direction. These tests pin both behaviors so the divergence
//! stays visible instead of silently unified.

#![allow(clippy::unwrap_used, clippy::float_cmp)]

use mono_core::driver::DeviceComponents;
use mono_core::serial::{wrap_shared, wrap_shared_unbuffered};
use mono_driver_horiba::Fhr1000Driver;
use mono_driver_princeton::SpectraProDriver;
use mono_logic::Monochromator;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

// =============================================================================
// Scripted devices
// =============================================================================

/// FHR1000-grammar device: `\r`-terminated commands, `o`-marked replies,
/// motors that are never busy.
async fn serve_fhr1000(mut port: DuplexStream, state: Arc<StdMutex<AsciiState>>) {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        if port.read_exact(&mut byte).await.is_err() {
            return;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
            continue;
        }
        let cmd = String::from_utf8(std::mem::take(&mut line)).unwrap();

        let reply: Vec<u8> = {
            let mut st = state.lock().unwrap();
            st.commands.push(cmd.clone());
            if cmd == "Z62,0" {
                format!("o{}\r", st.position_nm).into_bytes()
            } else if let Some(value) = cmd.strip_prefix("Z61,0,") {
                st.position_nm = value.parse().unwrap();
                b"o".to_vec()
            } else if cmd == "E" {
                b"oz".to_vec()
            } else {
                panic!("unexpected FHR1000 command {:?}", cmd);
            }
        };

        if port.write_all(&reply).await.is_err() {
            return;
        }
    }
}

/// SpectraPro-grammar device: `\r`-terminated commands, echoed replies
/// ending in ` ok`, moves blocking until "arrival".
async fn serve_spectrapro(mut port: DuplexStream, state: Arc<StdMutex<AsciiState>>) {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        if port.read_exact(&mut byte).await.is_err() {
            return;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
            continue;
        }
        let cmd = String::from_utf8(std::mem::take(&mut line)).unwrap();

        let reply: String = {
            let mut st = state.lock().unwrap();
            st.commands.push(cmd.clone());
            if cmd == "?NM" {
                format!("?NM  {:.3} nm  ok", st.position_nm)
            } else if let Some(value) = cmd.strip_suffix(" NM") {
                st.position_nm = value.trim().parse().unwrap();
                format!("{} ok", cmd)
            } else {
                panic!("unexpected SpectraPro command {:?}", cmd);
            }
        };

        if port.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

#[derive(Default)]
struct AsciiState {
    position_nm: f64,
    commands: Vec<String>,
}

fn grating_moves(state: &Arc<StdMutex<AsciiState>>, prefix: &str) -> Vec<f64> {
    state
        .lock()
        .unwrap()
        .commands
        .iter()
        .filter_map(|c| c.strip_prefix(prefix))
        .map(|v| v.trim().parse().unwrap())
        .collect()
}

fn fhr1000_at(position_nm: f64) -> (Monochromator, Arc<StdMutex<AsciiState>>) {
    let (device, host) = tokio::io::duplex(1024);
    let state = Arc::new(StdMutex::new(AsciiState {
        position_nm,
        ..Default::default()
    }));
    tokio::spawn(serve_fhr1000(host, state.clone()));

    let driver = Arc::new(Fhr1000Driver::with_port(wrap_shared(Box::new(device))).with_timing(
        Duration::from_millis(10),
        2_000,
        Duration::from_secs(2),
    ));
    let mono = Monochromator::from_components(
        DeviceComponents::new()
            .with_grating_drive(driver.clone())
            .with_slit_control(driver),
    )
    .unwrap();

    (mono, state)
}

fn spectrapro_at(position_nm: f64) -> (Monochromator, Arc<StdMutex<AsciiState>>) {
    let (device, host) = tokio::io::duplex(1024);
    let state = Arc::new(StdMutex::new(AsciiState {
        position_nm,
        ..Default::default()
    }));
    tokio::spawn(serve_spectrapro(host, state.clone()));

    let driver = Arc::new(
        SpectraProDriver::with_port(wrap_shared_unbuffered(Box::new(device)))
            .with_timing(Duration::from_millis(10), 2_000),
    );
    let mono = Monochromator::from_components(
        DeviceComponents::new().with_grating_drive(driver),
    )
    .unwrap();

    (mono, state)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn fhr1000_decreasing_move_prepositions_below_target() {
    let (mono, state) = fhr1000_at(510.0);

    let landed = mono.move_to_nm(500.0).await.unwrap();

    assert_eq!(grating_moves(&state, "Z61,0,"), vec![495.0, 500.0]);
    assert_eq!(landed, 500.0);
}

#[tokio::test(start_paused = true)]
async fn fhr1000_increasing_move_is_direct() {
    let (mono, state) = fhr1000_at(490.0);

    mono.move_to_nm(500.0).await.unwrap();

    assert_eq!(grating_moves(&state, "Z61,0,"), vec![500.0]);
}

#[tokio::test(start_paused = true)]
async fn spectrapro_decreasing_move_has_no_compensation() {
    let (mono, state) = spectrapro_at(510.0);

    let landed = mono.move_to_nm(500.0).await.unwrap();

    // One blocking query, no pre-positioning; the asymmetry with the
    // Jobin Yvon drivers is the documented device behavior. The trailing
    // "?NM" is the facade re-reading the position.
    let commands = state.lock().unwrap().commands.clone();
    assert_eq!(commands, vec!["500 NM".to_string(), "?NM".to_string()]);
    assert_eq!(landed, 500.0);
}

#[tokio::test(start_paused = true)]
async fn facade_exposes_slit_only_where_supported() {
    let (with_slit, _state) = fhr1000_at(500.0);
    let (without_slit, _state) = spectrapro_at(500.0);

    assert!(with_slit.has_slit_control());
    assert!(!without_slit.has_slit_control());
    assert!(without_slit.read_slit_um().await.is_err());
}
