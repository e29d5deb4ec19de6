use bt_hci::param::AdvEventProps;
use rand_core::{impls, Error, RngCore};
use trouble_controller::link::{AdvParams, LinkLayer, LllEvent, SyncParams};
use trouble_controller::mock_ticker::MockTicker;
use trouble_controller::pdu::AdvPdu;
use trouble_controller::pool::{PduPool, PduRef, PduStore};
use trouble_controller::ticker::TickerRole;

/// Deterministic xorshift generator.
pub struct TestRng(u32);

impl TestRng {
    pub fn new(seed: u32) -> Self {
        Self(seed.max(1))
    }
}

impl RngCore for TestRng {
    fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

pub type Ll = LinkLayer<'static, MockTicker, TestRng>;

pub const ADDR: [u8; 6] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

pub fn setup() -> Ll {
    let _ = env_logger::builder().is_test(true).try_init();
    let pool: &'static PduPool<32> = Box::leak(Box::new(PduPool::new()));
    LinkLayer::new(pool, MockTicker::new(1000), TestRng::new(0x1234_5678))
}

/// Parameters of a non-connectable, non-scannable set.
pub fn broadcast_params(sid: u8) -> AdvParams {
    AdvParams {
        props: AdvEventProps::new(),
        sid,
        adv_addr: ADDR,
        ..Default::default()
    }
}

/// Creates set `handle` with a periodic train of 100 ms.
#[allow(unused)]
pub fn periodic_set(ll: &mut Ll, handle: u8) {
    ll.adv_set_create(handle, broadcast_params(handle)).unwrap();
    ll.adv_sync_param_set(
        handle,
        SyncParams {
            interval: embassy_time::Duration::from_millis(100),
            include_tx_power: false,
        },
    )
    .unwrap();
}

#[allow(unused)]
pub fn load(ll: &Ll, r: PduRef) -> AdvPdu {
    ll.pool().load(r).unwrap()
}

/// Runs one event of `role` through expiry, radio prepare and done, then the upper layer work.
#[allow(unused)]
pub fn event(ll: &mut Ll, role: TickerRole, ticks_at_expire: u32) -> LllEvent {
    ll.ticker_expired(role.id(), ticks_at_expire, 0).unwrap();
    let ev = ll.lll_prepare().unwrap().unwrap();
    if let LllEvent::Prepared(_) = ev {
        ll.lll_done(role).unwrap();
    }
    ll.ull_run();
    ev
}
