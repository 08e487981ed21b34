//! Core logic for the Cheapolino talking toy.
//!
//! # Overview
//!
//! A battery-powered toy built around a microcontroller and a JQ8400 serial
//! MP3 module. Depending on the files found on the module at boot it runs as
//! either:
//! - a talking toy that speaks a random phrase on button press and now and
//!   then on its own, or
//! - a music box that plays the tracks in order, one per button press.
//!
//! # Power Management
//!
//! The whole firmware is a single loop with a 128 ms tick. Idle ticks are
//! counted; after a while the MP3 module is switched off (light sleep) and
//! later the tick timer itself is stopped so only the button can wake the
//! MCU (deep sleep). A low supply voltage silences speech and forces deep
//! sleep as soon as the light-sleep threshold is reached.
//!
//! # Module Organization
//!
//! - [`board`] - Wake sources and the platform capabilities the core needs
//! - [`config`] - Build-time configuration and derived tick counts
//! - [`seed_store`] - Wear-levelled random seed counter in EEPROM
//! - [`jq8400`] - Serial protocol driver for the playback module
//! - [`power`] - Active / light-sleep / deep-sleep scheduler
//! - [`events`] - Button, timed speech and music-box event selection
//! - [`battery`] - Supply voltage monitor
//! - [`app`] - Boot sequence and the per-tick loop tying it all together

#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait, reason = "single-threaded embedded")]

pub mod app;
pub mod battery;
pub mod board;
pub mod config;
pub mod events;
pub mod jq8400;
pub mod power;
pub mod seed_store;

#[cfg(test)]
mod testing;
