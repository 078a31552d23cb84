//! Shared test helpers for the unit, functional and proptest suites.

#![allow(dead_code)]
