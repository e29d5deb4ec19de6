use trouble_controller::chain::ChainIter;
use trouble_controller::link::{CteParams, DataOp, LllEvent};
use trouble_controller::pdu::Adi;
use trouble_controller::ticker::TickerRole;
use trouble_controller::time::{ticks_diff, us_to_ticks, EVENT_OVERHEAD_START_US};
use trouble_controller::Error;

mod common;
use common::*;

#[test]
fn extended_advertising_with_data() {
    let mut ll = setup();
    ll.adv_set_create(0, broadcast_params(3)).unwrap();
    ll.adv_ad_data_set(0, DataOp::Complete, b"HELLO").unwrap();

    let set = ll.adv_set(0).unwrap();
    let adi = Adi::new(3, 1);
    assert_eq!(set.adi(), adi);

    let primary = load(&ll, set.head().unwrap()).ext_header().unwrap();
    assert_eq!(primary.adi(), Some(adi));
    assert_eq!(primary.adv_addr(), None);
    assert!(primary.aux_ptr().is_some());

    let aux = set.aux().unwrap();
    let pdu = load(&ll, aux.head().unwrap());
    assert_eq!(pdu.ad_data().unwrap(), b"HELLO");
    let hdr = pdu.ext_header().unwrap();
    assert_eq!(hdr.adi(), Some(adi));
    assert_eq!(hdr.adv_addr(), Some(ADDR));

    ll.adv_enable(0, true).unwrap();
    assert!(ll.ticker().is_active(TickerRole::Adv(0).id()));
    assert!(ll.ticker().is_active(TickerRole::Aux(0).id()));

    let expired = ll.ticker_mut().advance(us_to_ticks(EVENT_OVERHEAD_START_US) + 1);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, TickerRole::Adv(0).id());

    let ev = event(&mut ll, TickerRole::Adv(0), expired[0].ticks_at_expire);
    let LllEvent::Prepared(prepared) = ev else {
        panic!("unexpected {:?}", ev);
    };
    assert_eq!(prepared.head, ll.adv_set(0).unwrap().current());

    // The primary PDU on air points at the auxiliary event.
    let set = ll.adv_set(0).unwrap();
    let ptr = load(&ll, set.current().unwrap()).ext_header().unwrap().aux_ptr().unwrap();
    let aux_expiry = ll.ticker().expiry_of(TickerRole::Aux(0).id()).unwrap();
    let to_aux = ticks_diff(aux_expiry, expired[0].ticks_at_expire);
    assert!(ptr.offset_us() > 0);
    assert!(ptr.offset_us() <= trouble_controller::time::ticks_to_us(to_aux));
    assert_eq!(ptr.chan_idx, set.aux().unwrap().chan_idx());
    assert!(ptr.chan_idx < 37);
}

#[test]
fn data_changes_while_enabled() {
    let mut ll = setup();
    ll.adv_set_create(0, broadcast_params(0)).unwrap();
    ll.adv_ad_data_set(0, DataOp::Complete, b"one").unwrap();
    ll.adv_enable(0, true).unwrap();

    assert_eq!(
        ll.adv_ad_data_set(0, DataOp::First, b"frag"),
        Err(Error::CommandDisallowed)
    );
    ll.adv_ad_data_set(0, DataOp::Complete, b"two").unwrap();
    ll.adv_ad_data_set(0, DataOp::Unchanged, &[]).unwrap();

    let set = ll.adv_set(0).unwrap();
    assert_eq!(set.adi().did, 3);
    let pdu = load(&ll, set.aux().unwrap().head().unwrap());
    assert_eq!(pdu.ad_data().unwrap(), b"two");
}

#[test]
fn failed_data_change_keeps_both_trains() {
    let mut ll = setup();
    ll.adv_set_create(0, broadcast_params(0)).unwrap();
    ll.adv_ad_data_set(0, DataOp::Complete, b"one").unwrap();
    ll.adv_enable(0, true).unwrap();
    let expired = ll.ticker_mut().advance(us_to_ticks(EVENT_OVERHEAD_START_US) + 1);
    event(&mut ll, TickerRole::Adv(0), expired[0].ticks_at_expire);

    let adi = ll.adv_set(0).unwrap().adi();
    let check_unchanged = |ll: &Ll| {
        let set = ll.adv_set(0).unwrap();
        assert_eq!(set.adi(), adi);
        let primary = load(ll, set.head().unwrap()).ext_header().unwrap();
        assert_eq!(primary.adi(), Some(adi));
        let aux = load(ll, set.aux().unwrap().head().unwrap());
        assert_eq!(aux.ext_header().unwrap().adi(), Some(adi));
        assert_eq!(aux.ad_data().unwrap(), b"one");
    };

    let mut held = Vec::new();
    while let Some(r) = ll.pool().alloc() {
        held.push(r);
    }

    // No buffer for the primary PDU.
    assert_eq!(
        ll.adv_ad_data_set(0, DataOp::Complete, b"two"),
        Err(Error::MemoryCapacityExceeded)
    );
    check_unchanged(&ll);

    // Room for the primary PDU, none for the auxiliary chain.
    ll.pool().free(held.pop().unwrap()).unwrap();
    assert_eq!(
        ll.adv_ad_data_set(0, DataOp::Complete, &[0x5A; 600]),
        Err(Error::MemoryCapacityExceeded)
    );
    check_unchanged(&ll);

    for r in held {
        ll.pool().free(r).unwrap();
    }
    ll.adv_ad_data_set(0, DataOp::Complete, b"two").unwrap();
    let set = ll.adv_set(0).unwrap();
    assert_eq!(set.adi(), adi.next());
    let primary = load(&ll, set.head().unwrap()).ext_header().unwrap();
    assert_eq!(primary.adi(), Some(adi.next()));
    let aux = load(&ll, set.aux().unwrap().head().unwrap());
    assert_eq!(aux.ad_data().unwrap(), b"two");
}

#[test]
fn long_data_is_chained() {
    let mut ll = setup();
    ll.adv_set_create(0, broadcast_params(0)).unwrap();
    let data = [0xA5; 600];
    ll.adv_ad_data_set(0, DataOp::Complete, &data).unwrap();

    let pool = ll.pool();
    let head = ll.adv_set(0).unwrap().aux().unwrap().head().unwrap();
    let mut out = Vec::new();
    let mut count = 0;
    for r in ChainIter::new(pool, head) {
        let pdu = pool.load(r).unwrap();
        out.extend_from_slice(pdu.ad_data().unwrap());
        count += 1;
    }
    assert!(count >= 3);
    assert_eq!(out, data);
}

#[test]
fn periodic_train_with_cte() {
    let mut ll = setup();
    periodic_set(&mut ll, 0);
    ll.adv_sync_ad_data_set(0, DataOp::Complete, b"HELLO").unwrap();

    let cte = CteParams { len: 20, ty: 0, count: 3 };
    ll.adv_sync_cte_params_set(0, cte).unwrap();
    ll.adv_sync_cte_enable(0, true).unwrap();
    assert_eq!(ll.adv_sync_cte_params_set(0, cte), Err(Error::CommandDisallowed));

    let pool = ll.pool();
    let head = ll.adv_set(0).unwrap().sync().unwrap().head().unwrap();
    let chain: Vec<_> = ChainIter::new(pool, head).map(|r| pool.load(r).unwrap()).collect();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[0].ad_data().unwrap(), b"HELLO");
    for pdu in &chain {
        assert_eq!(pdu.ext_header().unwrap().cte_info().map(|c| c.time), Some(20));
    }

    ll.adv_sync_cte_enable(0, false).unwrap();
    let head = ll.adv_set(0).unwrap().sync().unwrap().head().unwrap();
    assert_eq!(ChainIter::new(pool, head).count(), 1);
    assert_eq!(pool.load(head).unwrap().ext_header().unwrap().cte_info(), None);
}

#[test]
fn periodic_train_starts_with_advertising() {
    let mut ll = setup();
    periodic_set(&mut ll, 0);
    ll.adv_sync_enable(0, true, true).unwrap();
    assert!(!ll.adv_set(0).unwrap().sync().unwrap().is_started());

    ll.adv_enable(0, true).unwrap();
    let sync = ll.adv_set(0).unwrap().sync().unwrap();
    assert!(sync.is_started());
    assert!(sync.adi().is_some());
    assert!(ll.ticker().is_active(TickerRole::Sync(0).id()));

    // Placed after the auxiliary event it is announced from.
    let aux = TickerRole::Aux(0).id();
    let aux_end = ll.ticker().expiry_of(aux).unwrap() + ll.ticker().slot_of(aux).unwrap();
    let sync_at = ll.ticker().expiry_of(TickerRole::Sync(0).id()).unwrap();
    assert!(sync_at >= aux_end);
}

#[test]
fn periodic_did_follows_adi() {
    let mut ll = setup();
    periodic_set(&mut ll, 0);
    let sync_adi = |ll: &Ll| {
        let sync = ll.adv_set(0).unwrap().sync().unwrap();
        let on_air = load(ll, sync.head().unwrap()).ext_header().unwrap().adi();
        assert_eq!(on_air, sync.adi());
        sync.adi()
    };

    ll.adv_sync_ad_data_set(0, DataOp::Complete, b"a").unwrap();
    assert_eq!(sync_adi(&ll), None);

    ll.adv_sync_enable(0, true, true).unwrap();
    let adi = sync_adi(&ll).unwrap();
    ll.adv_sync_ad_data_set(0, DataOp::Complete, b"b").unwrap();
    assert_eq!(sync_adi(&ll), Some(adi.next()));

    // Changes made without ADI keep the DID.
    ll.adv_sync_enable(0, true, false).unwrap();
    ll.adv_sync_ad_data_set(0, DataOp::Complete, b"c").unwrap();
    assert_eq!(sync_adi(&ll), None);
    ll.adv_sync_enable(0, true, true).unwrap();
    assert_eq!(sync_adi(&ll), Some(adi.next()));
}

#[test]
fn periodic_trains_do_not_overlap() {
    let mut ll = setup();
    for handle in 0..2 {
        periodic_set(&mut ll, handle);
        ll.adv_sync_enable(handle, true, false).unwrap();
        ll.adv_enable(handle, true).unwrap();
    }

    let first = TickerRole::Sync(0).id();
    let first_end = ll.ticker().expiry_of(first).unwrap() + ll.ticker().slot_of(first).unwrap();
    let second = ll.ticker().expiry_of(TickerRole::Sync(1).id()).unwrap();
    assert!(second >= first_end);
}

#[test]
fn stop_waits_for_event_in_flight() {
    let mut ll = setup();
    ll.adv_set_create(0, broadcast_params(0)).unwrap();
    ll.adv_ad_data_set(0, DataOp::Complete, b"HELLO").unwrap();
    ll.adv_enable(0, true).unwrap();

    let expired = ll.ticker_mut().advance(us_to_ticks(EVENT_OVERHEAD_START_US) + 1);
    ll.ticker_expired(expired[0].id, expired[0].ticks_at_expire, 0).unwrap();

    ll.adv_enable(0, false).unwrap();
    assert!(!ll.ticker().is_active(TickerRole::Adv(0).id()));
    assert!(!ll.ticker().is_active(TickerRole::Aux(0).id()));
    assert!(ll.adv_set(0).unwrap().is_disabling());
    assert_eq!(ll.adv_set_remove(0), Err(Error::CommandDisallowed));
    assert_eq!(ll.adv_enable(0, true), Err(Error::CommandDisallowed));

    assert_eq!(ll.lll_prepare(), Ok(Some(LllEvent::Aborted(TickerRole::Adv(0)))));
    ll.ull_run();
    assert!(!ll.adv_set(0).unwrap().is_disabling());

    let free = ll.pool().available();
    ll.adv_set_remove(0).unwrap();
    assert!(ll.adv_set(0).is_none());
    assert!(ll.pool().available() > free);
}

#[test]
fn set_handles() {
    let mut ll = setup();
    ll.adv_set_create(0, broadcast_params(0)).unwrap();
    assert_eq!(ll.adv_set_create(0, broadcast_params(0)), Err(Error::CommandDisallowed));
    assert_eq!(ll.adv_set_create(0xFF, broadcast_params(0)), Err(Error::InvalidParameter));
    assert_eq!(ll.adv_set_remove(1), Err(Error::UnknownAdvIdentifier));
    assert_eq!(
        ll.adv_sync_enable(0, true, false),
        Err(Error::CommandDisallowed)
    );
}
