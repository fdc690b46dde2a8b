// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Pieces shared by the telemetry consumer and RPC envoys: the payload
//! (de)serialization contract, the topic-template parser (component N), and
//! the MQTT-5 user-property bag (component B).

pub mod payload_serialize;
pub mod property_bag;
pub mod topic_processor;
