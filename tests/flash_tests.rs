#![allow(dead_code, unused_imports)]
mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{spawn_vecu, EcuAction, VecuConfig, ZcuBootSim};
use zcuflash::can::{AsyncCanAdapter, VirtualCan};
use zcuflash::flash::{block_layout, FlashJob, JobController, StepTrace};
use zcuflash::image::{placeholder_signature, FlashImage};
use zcuflash::isotp::{IsoTpAdapter, IsoTpConfig};
use zcuflash::security::Zone;
use zcuflash::uds::UDSClient;

const EXPECTED_STEPS: [&str; 27] = [
    "enter_default_session",
    "broadcast_extended_session",
    "check_programming_preconditions",
    "broadcast_dtc_setting_off",
    "broadcast_communication_off",
    "enter_programming_session",
    "bypass_integrity_check",
    "enable_programming_mode",
    "security_access",
    "read_programming_status",
    "write_tester_fingerprint",
    "request_sbl_download",
    "transfer_sbl",
    "sbl_transfer_exit",
    "post_sbl_signature",
    "erase_application",
    "request_app_download",
    "transfer_app",
    "app_transfer_exit",
    "post_app_signature",
    "finalize_programming",
    "broadcast_communication_on",
    "ecu_reset",
    "enter_extended_session",
    "clear_dtc",
    "broadcast_dtc_setting_on",
    "leave_diagnostic_session",
];

fn test_image(start_address: u32, len: usize) -> FlashImage {
    FlashImage {
        start_address,
        data: (0..len).map(|i| (i * 7 & 0xff) as u8).collect(),
        signature: Some(placeholder_signature()),
    }
}

fn trace_collector(names: Arc<Mutex<Vec<String>>>) -> zcuflash::flash::TraceHandler {
    Arc::new(move |step: &StepTrace| {
        names.lock().unwrap().push(step.name.to_string());
    })
}

struct FlashHarness {
    controller: JobController,
    vecu: common::Vecu,
    sim: Arc<Mutex<ZcuBootSim>>,
}

fn flash_harness(sim: ZcuBootSim) -> FlashHarness {
    let (link, peer) = VirtualCan::pair();
    let adapter = AsyncCanAdapter::new(link);
    let sim = Arc::new(Mutex::new(sim));
    let vecu = spawn_vecu(peer, VecuConfig::default(), ZcuBootSim::responder(sim.clone()));
    FlashHarness {
        controller: JobController::new(adapter),
        vecu,
        sim,
    }
}

#[tokio::test]
#[serial_test::serial]
async fn flash_full_sequence_happy_path() {
    let h = flash_harness(ZcuBootSim::new(Zone::Rzcu));

    // The advertised block length of 0x102 gives 0x100 byte blocks, so the
    // 70000 byte application needs 274 blocks and the sequence counter
    // wraps past 0xFF.
    let sbl = test_image(0x2000_0000, 2_000);
    let app = test_image(0x0801_0000, 70_000);

    let names = Arc::new(Mutex::new(Vec::new()));
    let mut job = FlashJob::new(Zone::Rzcu, sbl.clone(), app.clone());
    job.reset_settle = Duration::from_millis(50);
    job.trace = Some(trace_collector(names.clone()));

    h.controller.execute(&job).await.unwrap();

    // Exactly the canonical step headers, in order.
    let names = names.lock().unwrap();
    assert_eq!(names.as_slice(), &EXPECTED_STEPS[..]);

    let sim = h.sim.lock().unwrap();
    let max_block_size: usize = 0x102 - 2;
    let expected_blocks = 2_000usize.div_ceil(max_block_size) + 70_000usize.div_ceil(max_block_size);
    assert_eq!(sim.blocks_received, expected_blocks);
    assert!(sim.sequence_wrapped_to_zero);
    assert!(sim.unlocked);

    // The ECU saw both images bit-exact, and one signature per image.
    assert_eq!(sim.downloads.len(), 2);
    assert_eq!(sim.downloads[0], sbl.data);
    assert_eq!(sim.downloads[1], app.data);
    assert_eq!(sim.signatures.len(), 2);
    assert!(sim.signatures.iter().all(|s| s == &placeholder_signature()));

    // The functional broadcasts went out on 0x7DF.
    let functional = common::frames_for(&h.vecu, 0x7df);
    let payloads: Vec<Vec<u8>> = functional
        .iter()
        .map(|frame| frame.data[1..1 + frame.data[0] as usize].to_vec())
        .collect();
    assert!(payloads.contains(&vec![0x10, 0x83]));
    assert!(payloads.contains(&vec![0x85, 0x82]));
    assert!(payloads.contains(&vec![0x28, 0x83, 0x03]));
    assert!(payloads.contains(&vec![0x28, 0x80, 0x03]));
    assert!(payloads.contains(&vec![0x85, 0x81]));
}

#[tokio::test]
#[serial_test::serial]
async fn flash_erase_with_pending_response() {
    let mut sim = ZcuBootSim::new(Zone::Rzcu);
    sim.erase_pending = true;
    let h = flash_harness(sim);

    let mut job = FlashJob::new(
        Zone::Rzcu,
        test_image(0x2000_0000, 64),
        test_image(0x0801_0000, 256),
    );
    job.reset_settle = Duration::from_millis(10);

    h.controller.execute(&job).await.unwrap();
}

#[tokio::test]
#[serial_test::serial]
async fn flash_erase_rejected_aborts_with_step() {
    let mut sim = ZcuBootSim::new(Zone::Rzcu);
    sim.erase_status = 0x01;
    let h = flash_harness(sim);

    let mut job = FlashJob::new(
        Zone::Rzcu,
        test_image(0x2000_0000, 64),
        test_image(0x0801_0000, 256),
    );
    job.reset_settle = Duration::from_millis(10);

    let err = h.controller.execute(&job).await.unwrap_err();
    match err {
        zcuflash::Error::FlashError(zcuflash::flash::Error::StepFailed { index, name, .. }) => {
            assert_eq!(index, 16);
            assert_eq!(name, "erase_application");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
#[serial_test::serial]
async fn flash_with_calibration_images() {
    let h = flash_harness(ZcuBootSim::new(Zone::Rzcu));

    let names = Arc::new(Mutex::new(Vec::new()));
    let mut job = FlashJob::new(
        Zone::Rzcu,
        test_image(0x2000_0000, 128),
        test_image(0x0801_0000, 512),
    );
    job.cal_is_must = true;
    job.cal1 = Some(test_image(0x0802_0000, 300));
    job.cal2 = Some(test_image(0x0803_0000, 200));
    job.reset_settle = Duration::from_millis(10);
    job.trace = Some(trace_collector(names.clone()));

    h.controller.execute(&job).await.unwrap();

    let names = names.lock().unwrap();
    // 27 canonical steps plus two 5-step calibration phases.
    assert_eq!(names.len(), 37);
    let cal_steps: Vec<&str> = names
        .iter()
        .filter(|n| n.contains("cal"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        cal_steps,
        [
            "erase_cal1",
            "request_cal1_download",
            "transfer_cal1",
            "cal1_transfer_exit",
            "post_cal1_signature",
            "erase_cal2",
            "request_cal2_download",
            "transfer_cal2",
            "cal2_transfer_exit",
            "post_cal2_signature",
        ]
    );
    // The calibration phases happen between the SBL signature and the
    // application erase.
    let sbl_sig = names.iter().position(|n| n == "post_sbl_signature").unwrap();
    let app_erase = names.iter().position(|n| n == "erase_application").unwrap();
    assert_eq!(names[sbl_sig + 1], "erase_cal1");
    assert_eq!(app_erase, sbl_sig + 11);

    let sim = h.sim.lock().unwrap();
    assert_eq!(sim.downloads.len(), 4);
    assert_eq!(sim.signatures.len(), 4);
}

#[tokio::test]
#[serial_test::serial]
async fn flash_missing_signature_aborts() {
    let h = flash_harness(ZcuBootSim::new(Zone::Rzcu));

    let mut sbl = test_image(0x2000_0000, 64);
    sbl.signature = None;
    let mut job = FlashJob::new(Zone::Rzcu, sbl, test_image(0x0801_0000, 128));
    job.reset_settle = Duration::from_millis(10);

    let err = h.controller.execute(&job).await.unwrap_err();
    match err {
        zcuflash::Error::FlashError(zcuflash::flash::Error::StepFailed { name, .. }) => {
            assert_eq!(name, "post_sbl_signature");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
#[serial_test::serial]
async fn keep_alive_respects_flashing_gate() {
    let (link, peer) = VirtualCan::pair();
    let adapter = AsyncCanAdapter::new(link);
    let vecu = spawn_vecu(peer, VecuConfig::default(), Box::new(|_| vec![]));

    let controller =
        JobController::new(adapter).with_keep_alive_period(Duration::from_millis(50));

    let functional = IsoTpAdapter::new(
        controller.adapter(),
        IsoTpConfig::new(0x7df.into(), 0x7de.into()),
    );
    let broadcast = UDSClient::new(&functional);

    let heartbeats = |vecu: &common::Vecu| {
        common::frames_for(vecu, 0x7df)
            .iter()
            .filter(|frame| frame.data[1] == 0x3e && frame.data[2] == 0x80)
            .count()
    };

    tokio::select! {
        _ = controller.serve_keep_alive(&broadcast) => unreachable!(),
        _ = tokio::time::sleep(Duration::from_millis(300)) => {}
    }
    // Let anything still in the transmit queue reach the bus.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent_while_idle = heartbeats(&vecu);
    assert!(sent_while_idle >= 3, "expected heartbeats, got {sent_while_idle}");

    // While a flash is marked in progress the heartbeat stays silent.
    controller.keep_alive_gate().store(true, Ordering::SeqCst);
    tokio::select! {
        _ = controller.serve_keep_alive(&broadcast) => unreachable!(),
        _ = tokio::time::sleep(Duration::from_millis(300)) => {}
    }
    assert_eq!(heartbeats(&vecu), sent_while_idle);
}

#[test]
fn exit_code_mapping() {
    assert_eq!(JobController::exit_code(&Ok(())), 0);
    assert_eq!(
        JobController::exit_code(&Err(zcuflash::Error::Interrupted)),
        1
    );
}

#[test]
fn block_layout_partitioning() {
    // (length, max block size, expected block lengths)
    let cases: &[(usize, usize, &[usize])] = &[
        (10, 4, &[4, 4, 2]),
        (12, 4, &[4, 4, 4]),
        (1, 4, &[1]),
        (0, 4, &[0]),
        (4088, 4088, &[4088]),
        (4089, 4088, &[4088, 1]),
    ];

    for (length, max, expected) in cases {
        let blocks: Vec<(usize, usize)> = block_layout(*length, *max).collect();
        let lens: Vec<usize> = blocks.iter().map(|(_, len)| *len).collect();
        assert_eq!(&lens, expected, "length {length} max {max}");

        // Offsets are contiguous.
        let mut expected_offset = 0;
        for (offset, len) in blocks {
            assert_eq!(offset, expected_offset);
            expected_offset += len;
        }
        assert_eq!(expected_offset, *length);
    }
}
