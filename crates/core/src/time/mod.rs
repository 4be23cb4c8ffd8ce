pub mod vn_market;
