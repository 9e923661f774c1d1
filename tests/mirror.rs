//! Remote mirror against a simulated RDCU over descriptor rings

#![allow(clippy::unwrap_used)]

mod common;

use common::*;
use rdcu_rmap::Error;
use rdcu_rmap::io::MemoryIo;
use rdcu_rmap::mirror::SlotState;

#[test]
fn read_completes_into_shadow() {
    let mut mirror = mirror();
    let mut rdcu = SimulatedRdcu::new();
    rdcu.memory
        .write_bytes(0x1000, &[0xDE, 0xAD, 0xBE, 0xEF])
        .unwrap();

    assert_eq!(mirror.submit_read(0x1000, SHADOW_BASE, 4).unwrap(), 0);
    assert_eq!(mirror.pending_count().unwrap(), 1);

    assert_eq!(rdcu.service(mirror.link_mut()), 1);
    assert_eq!(mirror.pending_count().unwrap(), 0);
    assert_eq!(
        mirror.shadow().slice(SHADOW_BASE, 4).unwrap(),
        &[0xDE, 0xAD, 0xBE, 0xEF]
    );
}

#[test]
fn synthetic_reply_completes_read() {
    let mut mirror = mirror();
    let mut rdcu = SimulatedRdcu::new();

    mirror.submit_read(0x1000, SHADOW_BASE + 0x10, 4).unwrap();
    rdcu.inject(read_reply(0, &[0xDE, 0xAD, 0xBE, 0xEF]));
    assert_eq!(rdcu.deliver(mirror.link_mut()), 1);

    assert_eq!(mirror.drain_replies().unwrap(), 1);
    assert_eq!(mirror.pending_count().unwrap(), 0);
    assert_eq!(
        mirror.shadow().slice(SHADOW_BASE + 0x10, 4).unwrap(),
        &[0xDE, 0xAD, 0xBE, 0xEF]
    );
}

#[test]
fn sync_round_trip() {
    let mut mirror = mirror();
    let mut rdcu = SimulatedRdcu::new();
    let pattern: Vec<u8> = (0..600u32).map(|i| (i * 7) as u8).collect();
    mirror
        .shadow_mut()
        .write_bytes(SHADOW_BASE, &pattern)
        .unwrap();

    // 256 + 256 + 88
    assert_eq!(mirror.sync_to_remote(SHADOW_BASE, 0x2000, 600).unwrap(), 3);
    rdcu.service(mirror.link_mut());
    assert_eq!(mirror.pending_count().unwrap(), 0);
    assert_eq!(rdcu.memory.slice(0x2000, 600).unwrap(), pattern.as_slice());

    mirror
        .shadow_mut()
        .write_bytes(SHADOW_BASE, &[0u8; 600])
        .unwrap();
    assert_eq!(
        mirror.sync_from_remote(0x2000, SHADOW_BASE + 0x400, 600).unwrap(),
        3
    );
    rdcu.service(mirror.link_mut());
    assert_eq!(mirror.pending_count().unwrap(), 0);
    assert_eq!(
        mirror.shadow().slice(SHADOW_BASE + 0x400, 600).unwrap(),
        pattern.as_slice()
    );
    assert_eq!(mirror.stats().completed, 6);
}

#[test]
fn unmatched_replies_leave_live_slots() {
    let mut mirror = mirror();
    let mut rdcu = SimulatedRdcu::new();
    rdcu.memory.write_bytes(0x100, &[0x55; 48]).unwrap();
    rdcu.mute = true;

    for i in 0..3u32 {
        mirror
            .submit_read(0x100 + i * 16, SHADOW_BASE + i * 16, 16)
            .unwrap();
    }
    rdcu.service(mirror.link_mut());
    mirror.release_slot(0);
    let live: Vec<_> = mirror.log().iter().map(|(id, txn)| (id, *txn)).collect();

    // One for a released slot, one for a slot never used
    rdcu.inject(read_reply(0, &[0xAA; 16]));
    rdcu.inject(read_reply(5, &[0xBB; 16]));
    rdcu.deliver(mirror.link_mut());

    assert_eq!(mirror.pending_count().unwrap(), 2);
    let after: Vec<_> = mirror.log().iter().map(|(id, txn)| (id, *txn)).collect();
    assert_eq!(live, after);
    assert_eq!(mirror.shadow().slice(SHADOW_BASE, 48).unwrap(), &[0u8; 48]);
    assert_eq!(mirror.stats().unmatched, 2);
}

#[test]
fn slots_run_out_then_recover() {
    let mut mirror = mirror();
    let mut rdcu = SimulatedRdcu::new();

    for expected in 0..TX_DESCRIPTORS as u16 {
        assert_eq!(mirror.submit_write(0x40, &[1, 2, 3, 4]).unwrap(), expected);
    }
    assert_eq!(mirror.submit_write(0x40, &[1, 2, 3, 4]), Err(Error::Exhausted));
    assert_eq!(mirror.pending_count().unwrap(), TX_DESCRIPTORS);

    rdcu.service(mirror.link_mut());
    assert_eq!(mirror.pending_count().unwrap(), 0);
    assert_eq!(rdcu.executed, TX_DESCRIPTORS);

    // Reclaim happens lazily as the next command is queued
    assert_eq!(mirror.submit_write(0x40, &[5]).unwrap(), 0);
    assert_eq!(mirror.link().tx_stats().packets, TX_DESCRIPTORS as u64);
}

#[test]
fn error_status_completes_without_data() {
    let mut mirror = mirror();
    let mut rdcu = SimulatedRdcu::new();
    mirror
        .shadow_mut()
        .write_bytes(SHADOW_BASE, &[0x77; 4])
        .unwrap();

    // Beyond the end of RDCU memory
    mirror
        .submit_read(RDCU_MEM_SIZE as u32, SHADOW_BASE, 4)
        .unwrap();
    rdcu.service(mirror.link_mut());

    assert_eq!(mirror.pending_count().unwrap(), 0);
    assert_eq!(mirror.shadow().slice(SHADOW_BASE, 4).unwrap(), &[0x77; 4]);
    assert_eq!(mirror.stats().failed, 1);
}

#[test]
fn wrong_key_is_refused() {
    let mut mirror = mirror();
    let mut rdcu = SimulatedRdcu::new();
    rdcu.key = 0x20;

    mirror.submit_write(0x10, &[9; 4]).unwrap();
    rdcu.service(mirror.link_mut());

    assert_eq!(mirror.pending_count().unwrap(), 0);
    assert_eq!(mirror.stats().failed, 1);
    assert_eq!(rdcu.memory.slice(0x10, 4).unwrap(), &[0; 4]);
}

#[test]
fn abandoned_transactions_ignore_late_replies() {
    let mut mirror = mirror();
    let mut rdcu = SimulatedRdcu::new();
    rdcu.memory.write_bytes(0, &[0x11; 4]).unwrap();

    mirror.submit_read(0, SHADOW_BASE, 4).unwrap();
    assert_eq!(mirror.log().state(0), SlotState::Submitted);

    // Caller gives up before the target answers
    let mut polls = 0;
    while mirror.pending_count().unwrap() > 0 {
        polls += 1;
        if polls == 3 {
            assert_eq!(mirror.reset(), 1);
        }
    }
    assert_eq!(mirror.stats().abandoned, 1);

    rdcu.service(mirror.link_mut());
    assert_eq!(mirror.drain_replies().unwrap(), 1);
    assert_eq!(mirror.shadow().slice(SHADOW_BASE, 4).unwrap(), &[0; 4]);
    assert_eq!(mirror.stats().unmatched, 1);
}

#[test]
fn routed_commands_reach_the_target() {
    let cfg = rdcu_rmap::mirror::LinkConfig {
        dest_path: vec![2, 4],
        reply_path: vec![0, 0, 0, 1],
        ..link_config()
    };
    let mut mirror = rdcu_rmap::mirror::RemoteMirror::new(
        link(),
        rdcu_rmap::io::BufferIo::new(SHADOW_BASE, SHADOW_SIZE),
        cfg,
    )
    .unwrap();
    let mut rdcu = SimulatedRdcu::new();

    mirror.submit_write(0x80, &[0xC0, 0xFF, 0xEE]).unwrap();
    rdcu.service(mirror.link_mut());

    // Path bytes never reach the target
    assert_eq!(rdcu.wire[0][0], RDCU_ADDRESS);
    assert_eq!(rdcu.memory.slice(0x80, 3).unwrap(), &[0xC0, 0xFF, 0xEE]);
    assert_eq!(mirror.pending_count().unwrap(), 0);
}

#[test]
fn empty_packet_ahead_of_reply() {
    let mut mirror = mirror();
    let mut rdcu = SimulatedRdcu::new();
    rdcu.memory
        .write_bytes(0x1000, &[0xDE, 0xAD, 0xBE, 0xEF])
        .unwrap();

    mirror.submit_read(0x1000, SHADOW_BASE, 4).unwrap();
    assert!(rdcu.deliver_empty(mirror.link_mut()));
    rdcu.service(mirror.link_mut());

    assert_eq!(mirror.pending_count().unwrap(), 0);
    assert_eq!(
        mirror.shadow().slice(SHADOW_BASE, 4).unwrap(),
        &[0xDE, 0xAD, 0xBE, 0xEF]
    );
    assert_eq!(mirror.link().rx_stats().dropped, 1);
    assert_eq!(mirror.stats().malformed, 0);
}
