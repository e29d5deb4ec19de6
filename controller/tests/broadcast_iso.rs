use trouble_controller::chan_sel::ChannelMap;
use trouble_controller::codec::Decode;
use trouble_controller::link::{BigParams, LllEvent};
use trouble_controller::pdu::acad::{self, BigInfo, AD_TYPE_BIGINFO, AD_TYPE_CHM_UPD_IND};
use trouble_controller::pool::PduRef;
use trouble_controller::ticker::TickerRole;
use trouble_controller::Error;

mod common;
use common::*;

const BIG: u8 = 0x10;

fn running_train(ll: &mut Ll) {
    periodic_set(ll, 0);
    ll.adv_sync_enable(0, true, false).unwrap();
    ll.adv_enable(0, true).unwrap();
}

fn sync_head(ll: &Ll) -> PduRef {
    ll.adv_set(0).unwrap().sync().unwrap().head().unwrap()
}

fn acad_of(ll: &Ll, r: PduRef) -> Vec<u8> {
    load(ll, r).acad().unwrap().to_vec()
}

fn big_info_of(acad: &[u8]) -> Option<BigInfo> {
    let range = acad::find(acad, AD_TYPE_BIGINFO)?;
    Some(BigInfo::decode(&acad[range.start + 2..range.end]).unwrap())
}

#[test]
fn big_is_announced_in_acad() {
    let mut ll = setup();
    running_train(&mut ll);
    ll.big_create(BIG, 0, BigParams::default()).unwrap();

    let iso = ll.big(BIG).unwrap();
    assert_eq!(iso.adv_handle(), 0);
    assert_eq!(iso.timing().iso_interval(), 8);
    assert!(ll.ticker().is_active(TickerRole::Iso(0).id()));

    let info = big_info_of(&acad_of(&ll, sync_head(&ll))).unwrap();
    assert_eq!(info.num_bis, 1);
    assert_eq!(info.iso_interval, 8);
    assert_eq!(info.max_sdu, 100);
    assert_eq!(info.sdu_interval, 10_000);
    assert_eq!(info.seed_access_addr, iso.big_info().seed_access_addr);
    assert_eq!(info.encryption, None);

    // The BIG goes on air after the periodic event announcing it.
    let sync = TickerRole::Sync(0).id();
    let sync_end = ll.ticker().expiry_of(sync).unwrap() + ll.ticker().slot_of(sync).unwrap();
    assert!(ll.ticker().expiry_of(TickerRole::Iso(0).id()).unwrap() >= sync_end);

    let at = ll.ticker().expiry_of(sync).unwrap();
    event(&mut ll, TickerRole::Sync(0), at);
    let current = ll.adv_set(0).unwrap().sync().unwrap().current().unwrap();
    let info = big_info_of(&acad_of(&ll, current)).unwrap();
    assert!(info.offs > 0);
}

#[test]
fn big_create_checks() {
    let mut ll = setup();
    ll.adv_set_create(1, broadcast_params(1)).unwrap();
    assert_eq!(ll.big_create(BIG, 1, BigParams::default()), Err(Error::CommandDisallowed));
    assert_eq!(ll.big_create(BIG, 0, BigParams::default()), Err(Error::UnknownAdvIdentifier));

    running_train(&mut ll);
    let invalid = BigParams {
        num_bis: 0,
        ..Default::default()
    };
    assert_eq!(ll.big_create(BIG, 0, invalid), Err(Error::InvalidParameter));
    let unfit = BigParams {
        sdu_interval_us: 5_000,
        max_sdu: 251,
        max_latency_ms: 5,
        num_bis: 2,
        ..Default::default()
    };
    assert_eq!(ll.big_create(BIG, 0, unfit), Err(Error::InvalidParameter));
    assert!(big_info_of(&acad_of(&ll, sync_head(&ll))).is_none());

    ll.big_create(BIG, 0, BigParams::default()).unwrap();
    assert_eq!(ll.big_create(BIG, 0, BigParams::default()), Err(Error::CommandDisallowed));
    assert_eq!(
        ll.big_create(BIG + 1, 0, BigParams::default()),
        Err(Error::MemoryCapacityExceeded)
    );
    assert_eq!(ll.adv_sync_enable(0, false, false), Err(Error::CommandDisallowed));
}

#[test]
fn encrypted_big_carries_session_material() {
    let mut ll = setup();
    running_train(&mut ll);
    let params = BigParams {
        broadcast_code: Some([0x42; 16]),
        ..Default::default()
    };
    ll.big_create(BIG, 0, params).unwrap();

    let info = big_info_of(&acad_of(&ll, sync_head(&ll))).unwrap();
    let enc = info.encryption.unwrap();
    assert_eq!(Some(enc), ll.big(BIG).unwrap().big_info().encryption);
}

#[test]
fn terminate_waits_for_event_in_flight() {
    let mut ll = setup();
    running_train(&mut ll);
    ll.big_create(BIG, 0, BigParams::default()).unwrap();

    let iso = TickerRole::Iso(0);
    let at = ll.ticker().expiry_of(iso.id()).unwrap();
    ll.ticker_expired(iso.id(), at, 0).unwrap();

    ll.big_terminate(BIG).unwrap();
    assert!(!ll.ticker().is_active(iso.id()));
    assert!(ll.big(BIG).unwrap().is_disabling());
    assert_eq!(ll.big_terminate(BIG), Err(Error::CommandDisallowed));
    assert!(big_info_of(&acad_of(&ll, sync_head(&ll))).is_some());

    assert_eq!(ll.lll_prepare(), Ok(Some(LllEvent::Aborted(iso))));
    ll.ull_run();
    assert!(ll.big(BIG).is_none());
    assert!(big_info_of(&acad_of(&ll, sync_head(&ll))).is_none());
    assert_eq!(ll.big_terminate(BIG), Err(Error::UnknownAdvIdentifier));
    ll.adv_sync_enable(0, false, false).unwrap();
}

#[test]
fn channel_map_update_reaches_instant() {
    let mut ll = setup();
    running_train(&mut ll);
    ll.big_create(BIG, 0, BigParams::default()).unwrap();

    let map = ChannelMap::new([0xFF, 0x03, 0x00, 0x00, 0x00]);
    assert_eq!(
        ll.chm_set(ChannelMap::new([0x01, 0, 0, 0, 0])),
        Err(Error::InvalidParameter)
    );
    ll.chm_set(map).unwrap();
    assert_eq!(ll.chm_get(), map);
    assert_eq!(ll.chm_set(ChannelMap::ALL), Err(Error::CommandDisallowed));

    let sync = ll.adv_set(0).unwrap().sync().unwrap();
    assert_eq!(sync.chm_pending(), Some((map, 6)));
    assert_eq!(ll.big(BIG).unwrap().chm_pending(), Some((map, 6)));
    assert!(acad::find(&acad_of(&ll, sync_head(&ll)), AD_TYPE_CHM_UPD_IND).is_some());

    let sync_at = ll.ticker().expiry_of(TickerRole::Sync(0).id()).unwrap();
    let iso_at = ll.ticker().expiry_of(TickerRole::Iso(0).id()).unwrap();
    for counter in 0..8u16 {
        let LllEvent::Prepared(prepared) = event(&mut ll, TickerRole::Sync(0), sync_at) else {
            panic!("periodic event aborted");
        };
        assert_eq!(prepared.event_counter, counter);
        if counter >= 6 {
            assert!(map.is_used(prepared.chan_idx));
        }
        let LllEvent::Prepared(prepared) = event(&mut ll, TickerRole::Iso(0), iso_at) else {
            panic!("BIG event aborted");
        };
        assert!(prepared.head.is_none());
        if counter >= 6 {
            assert!(map.is_used(prepared.chan_idx));
        }
    }

    let sync = ll.adv_set(0).unwrap().sync().unwrap();
    assert_eq!(sync.chm(), map);
    assert_eq!(sync.chm_pending(), None);
    let acad = acad_of(&ll, sync_head(&ll));
    assert!(acad::find(&acad, AD_TYPE_CHM_UPD_IND).is_none());
    assert_eq!(big_info_of(&acad).unwrap().chm, map.bytes());
    assert_eq!(ll.big(BIG).unwrap().chm(), map);

    let aux_head = ll.adv_set(0).unwrap().aux().unwrap().head().unwrap();
    let info = load(&ll, aux_head).ext_header().unwrap().sync_info().unwrap();
    assert_eq!(info.chm, map.bytes());

    ll.chm_set(ChannelMap::ALL).unwrap();
}

#[test]
fn stopped_train_takes_map_at_once() {
    let mut ll = setup();
    periodic_set(&mut ll, 0);
    let map = ChannelMap::new([0x00, 0xFF, 0x00, 0xF0, 0x00]);
    ll.chm_set(map).unwrap();
    let sync = ll.adv_set(0).unwrap().sync().unwrap();
    assert_eq!(sync.chm(), map);
    assert_eq!(sync.chm_pending(), None);

    ll.adv_sync_enable(0, true, false).unwrap();
    ll.adv_enable(0, true).unwrap();
    ll.chm_set(ChannelMap::ALL).unwrap();
    assert!(ll.adv_set(0).unwrap().sync().unwrap().chm_pending().is_some());
    ll.adv_sync_enable(0, false, false).unwrap();

    let sync = ll.adv_set(0).unwrap().sync().unwrap();
    assert_eq!(sync.chm(), ChannelMap::ALL);
    assert_eq!(sync.chm_pending(), None);
    assert!(acad::find(&acad_of(&ll, sync_head(&ll)), AD_TYPE_CHM_UPD_IND).is_none());
}
