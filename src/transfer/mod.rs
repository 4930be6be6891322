//! Atomic, idempotent transfers between two same-currency accounts.

mod engine;

pub use engine::{parse_amount, CreateTransfer, TransferEngine, MONEY_SCALE};

use crate::db::account::AccountRepository;
use crate::db::memory::MemoryStore;
use crate::db::transfer::TransferRepository;
use crate::db::tx::TransactionRepository;
use crate::db::PgUnitOfWork;

pub type PgTransferEngine =
    TransferEngine<PgUnitOfWork, AccountRepository, TransactionRepository, TransferRepository>;

pub type MemoryTransferEngine = TransferEngine<MemoryStore, MemoryStore, MemoryStore, MemoryStore>;
