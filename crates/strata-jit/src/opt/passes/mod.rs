pub mod const_fold;
pub mod nop_elim;
