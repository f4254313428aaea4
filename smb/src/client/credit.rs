//! Credit accounting for one connection (MS-SMB2 3.2.4.1.5).
//!
//! Each request spends `charge` credits and consumes as many consecutive message
//! ids. Responses return the charge and add whatever the server granted. The
//! ledger never lets in-flight charges exceed what the server granted.

/// Payload covered by one credit on multi-credit dialects.
pub const CREDIT_PAYLOAD_SIZE: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditGrant {
    pub message_id: u64,
    pub charge: u16,
}

#[derive(Debug)]
pub struct CreditLedger {
    balance: u32,
    outstanding: u32,
    next_message_id: u64,
    multi_credit: bool,
    target: u16,
}

impl CreditLedger {
    pub fn new(initial: u16, target: u16) -> Self {
        Self {
            balance: initial as u32,
            outstanding: 0,
            next_message_id: 0,
            multi_credit: false,
            target,
        }
    }

    pub fn set_multi_credit(&mut self, multi_credit: bool) {
        self.multi_credit = multi_credit;
    }

    pub fn multi_credit(&self) -> bool {
        self.multi_credit
    }

    /// Credits a request moving `payload` bytes costs.
    pub fn charge_for(&self, payload: usize) -> u16 {
        if !self.multi_credit || payload == 0 {
            1
        } else {
            payload.div_ceil(CREDIT_PAYLOAD_SIZE).min(u16::MAX as usize) as u16
        }
    }

    pub fn try_acquire(&mut self, charge: u16) -> Option<CreditGrant> {
        let charge = charge.max(1);
        if self.balance < charge as u32 {
            return None;
        }
        self.balance -= charge as u32;
        self.outstanding += charge as u32;
        let message_id = self.next_message_id;
        self.next_message_id += charge as u64;
        Some(CreditGrant { message_id, charge })
    }

    /// No amount of waiting can satisfy `charge`.
    pub fn can_never_satisfy(&self, charge: u16) -> bool {
        self.outstanding == 0 && (charge.max(1) as u32) > self.balance
    }

    /// Credits to ask for alongside a request, growing the window toward the target.
    pub fn credit_request(&self, charge: u16) -> u16 {
        let window = self.granted();
        let growth = (self.target as u32).saturating_sub(window).min(u16::MAX as u32) as u16;
        charge.max(1).saturating_add(growth)
    }

    /// A final response: the charge returns and the grant is added.
    pub fn complete(&mut self, charge: u16, granted: u16) {
        self.outstanding = self.outstanding.saturating_sub(charge.max(1) as u32);
        self.balance += granted as u32;
    }

    /// An interim response grants credits while the request stays in flight.
    pub fn grant(&mut self, granted: u16) {
        self.balance += granted as u32;
    }

    /// A request that never reached the wire gives its charge back.
    pub fn cancel(&mut self, grant: CreditGrant) {
        let charge = grant.charge.max(1) as u32;
        self.outstanding = self.outstanding.saturating_sub(charge);
        self.balance += charge;
    }

    pub fn available(&self) -> u32 {
        self.balance
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Credits the server currently has granted, spent or not.
    pub fn granted(&self) -> u32 {
        self.balance + self.outstanding
    }

    pub fn next_message_id(&self) -> u64 {
        self.next_message_id
    }
}
