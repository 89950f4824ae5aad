//! Behavioural scenarios for provisioning and batch runs against a scripted
//! cluster.

mod provisioning;
