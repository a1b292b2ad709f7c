mod common;

#[cfg(test)]
mod tests {
    use crusty_escrow::{
        common::{error::EscrowError, persist::Persister},
        config::EscrowConfig,
        interface::{TradeMessage, TxListenerKind},
        manager::TradeManager,
        testing::{SomeTestTradeParams, TestDoubles},
        trade::TradeState,
    };

    use super::common::{logger::setup as logger_setup, trade_party::TradeParty};

    async fn fire(party: &TradeParty, kind: TxListenerKind, confirmations: u32) {
        let tx_id = match kind {
            TxListenerKind::Deposit => SomeTestTradeParams::deposit_tx_id(),
            TxListenerKind::Payout => SomeTestTradeParams::payout_tx_id(),
        };
        assert!(
            party
                .doubles
                .tx_observer
                .fire(SomeTestTradeParams::trade_id(), kind, tx_id, confirmations)
                .await,
            "no {} listener registered",
            kind
        );
    }

    #[tokio::test]
    async fn test_buyer_seller_happy_path() {
        logger_setup();

        let seller = TradeParty::start(SomeTestTradeParams::seller_data()).await;
        let buyer = TradeParty::start(SomeTestTradeParams::buyer_data()).await;
        let mut seller_states = seller.trade.subscribe_state().await.unwrap();

        // Both sides prepare, only the seller funds the deposit
        buyer.trade.start().await.unwrap();
        seller.trade.start().await.unwrap();
        assert_eq!(buyer.state().await, TradeState::Preparation);
        assert_eq!(seller.state().await, TradeState::DepositPublished);

        assert_eq!(seller.deliver_messages_to(&buyer).await.unwrap(), 1);
        assert_eq!(buyer.state().await, TradeState::DepositPublished);

        // Deposit is seen, then confirmed
        fire(&seller, TxListenerKind::Deposit, 0).await;
        fire(&buyer, TxListenerKind::Deposit, 0).await;
        assert_eq!(seller.state().await, TradeState::DepositSeenInNetwork);
        assert_eq!(buyer.state().await, TradeState::DepositSeenInNetwork);

        fire(&seller, TxListenerKind::Deposit, 1).await;
        fire(&buyer, TxListenerKind::Deposit, 1).await;
        assert_eq!(seller.state().await, TradeState::DepositConfirmed);
        assert_eq!(buyer.state().await, TradeState::DepositConfirmed);

        // Off-chain payment
        buyer.trade.confirm_payment_started().await.unwrap();
        assert_eq!(buyer.state().await, TradeState::PaymentSent);
        assert_eq!(buyer.deliver_messages_to(&seller).await.unwrap(), 1);
        assert_eq!(seller.state().await, TradeState::PaymentSent);

        seller.trade.confirm_payment_received().await.unwrap();
        assert_eq!(seller.state().await, TradeState::PayoutPublished);
        assert_eq!(seller.deliver_messages_to(&buyer).await.unwrap(), 1);
        assert_eq!(buyer.state().await, TradeState::PayoutPublished);

        // Payout is seen by both
        fire(&seller, TxListenerKind::Payout, 0).await;
        fire(&buyer, TxListenerKind::Payout, 0).await;
        assert_eq!(seller.state().await, TradeState::PayoutSeenInNetwork);
        assert_eq!(buyer.state().await, TradeState::PayoutSeenInNetwork);

        seller.trade.complete().await.unwrap();
        buyer.trade.complete().await.unwrap();

        let seller_data = seller.trade.query_data().await.unwrap();
        let buyer_data = buyer.trade.query_data().await.unwrap();
        assert_eq!(seller_data.state, TradeState::Completed);
        assert_eq!(buyer_data.state, TradeState::Completed);
        assert_eq!(
            buyer_data.payout_tx_id,
            Some(SomeTestTradeParams::payout_tx_id())
        );
        assert!(seller_data.error_message.is_none());
        assert!(buyer_data.error_message.is_none());

        // 10 sat/vbyte from the provider, 233 and 169 vbytes
        assert_eq!(seller_data.deposit_tx_fee, Some(2_330));
        assert_eq!(seller_data.payout_tx_fee, Some(1_690));
        assert_eq!(seller.doubles.wallet.published_fees(), vec![2_330, 1_690]);
        // 0.1 BTC at 0.001 BTC/BTC for the maker, 0.003 BTC/BTC for the taker
        assert_eq!(seller_data.trade_fee, Some(10_000));
        assert_eq!(buyer_data.trade_fee, Some(30_000));

        for party in [&seller, &buyer] {
            for kind in [TxListenerKind::Deposit, TxListenerKind::Payout] {
                assert!(!party
                    .doubles
                    .tx_observer
                    .is_registered(SomeTestTradeParams::trade_id(), kind));
            }
        }

        let mut seen = Vec::new();
        while let Ok(change) = seller_states.try_recv() {
            seen.push(change.to);
        }
        assert_eq!(
            seen,
            vec![
                TradeState::DepositPublished,
                TradeState::DepositSeenInNetwork,
                TradeState::DepositConfirmed,
                TradeState::PaymentSent,
                TradeState::PaymentReceived,
                TradeState::PayoutPublished,
                TradeState::PayoutSeenInNetwork,
                TradeState::Completed,
            ]
        );

        seller.manager.shutdown().await.unwrap();
        buyer.manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_late_and_duplicate_events_are_ignored() {
        let seller = TradeParty::start(SomeTestTradeParams::seller_data()).await;
        seller.trade.start().await.unwrap();

        fire(&seller, TxListenerKind::Deposit, 0).await;
        assert_eq!(seller.state().await, TradeState::DepositSeenInNetwork);
        let persisted = seller.doubles.persistence.count();

        fire(&seller, TxListenerKind::Deposit, 0).await;
        assert_eq!(seller.state().await, TradeState::DepositSeenInNetwork);
        assert_eq!(seller.doubles.persistence.count(), persisted);

        fire(&seller, TxListenerKind::Deposit, 2).await;
        assert_eq!(seller.state().await, TradeState::DepositConfirmed);

        // Further confirmations have nowhere to go once the deposit is confirmed
        assert!(!seller
            .doubles
            .tx_observer
            .is_registered(SomeTestTradeParams::trade_id(), TxListenerKind::Deposit));
        assert!(
            !seller
                .doubles
                .tx_observer
                .fire(
                    SomeTestTradeParams::trade_id(),
                    TxListenerKind::Deposit,
                    SomeTestTradeParams::deposit_tx_id(),
                    0
                )
                .await
        );
        assert_eq!(seller.state().await, TradeState::DepositConfirmed);
        assert_eq!(seller.doubles.persistence.count(), persisted + 1);
    }

    #[tokio::test]
    async fn test_payment_sent_before_seller_sees_deposit_confirm() {
        logger_setup();

        let seller = TradeParty::start(SomeTestTradeParams::seller_data()).await;
        let buyer = TradeParty::start(SomeTestTradeParams::buyer_data()).await;

        seller.trade.start().await.unwrap();
        seller.deliver_messages_to(&buyer).await.unwrap();

        // Only the buyer's node has seen the deposit confirm
        fire(&buyer, TxListenerKind::Deposit, 1).await;
        buyer.trade.confirm_payment_started().await.unwrap();
        assert_eq!(seller.state().await, TradeState::DepositPublished);

        assert_eq!(buyer.deliver_messages_to(&seller).await.unwrap(), 1);
        assert_eq!(seller.state().await, TradeState::PaymentSent);
        assert!(!seller
            .doubles
            .tx_observer
            .is_registered(SomeTestTradeParams::trade_id(), TxListenerKind::Deposit));

        seller.trade.confirm_payment_received().await.unwrap();
        assert_eq!(seller.state().await, TradeState::PayoutPublished);
        assert_eq!(seller.deliver_messages_to(&buyer).await.unwrap(), 1);
        assert_eq!(buyer.state().await, TradeState::PayoutPublished);

        fire(&seller, TxListenerKind::Payout, 0).await;
        fire(&buyer, TxListenerKind::Payout, 0).await;
        seller.trade.complete().await.unwrap();
        buyer.trade.complete().await.unwrap();

        let seller_data = seller.trade.query_data().await.unwrap();
        assert_eq!(seller_data.state, TradeState::Completed);
        assert!(seller_data.error_message.is_none());
        assert_eq!(buyer.state().await, TradeState::Completed);
    }

    #[tokio::test]
    async fn test_payment_sent_before_deposit_is_rejected() {
        let seller = TradeParty::start(SomeTestTradeParams::seller_data()).await;

        let result = seller
            .trade
            .handle_peer_message(TradeMessage::PaymentSent)
            .await;

        assert!(matches!(result, Err(EscrowError::PipelineFailed(_))));
        let data = seller.trade.query_data().await.unwrap();
        // Nothing is locked yet, so the broken protocol fails the trade
        assert_eq!(data.state, TradeState::Failed);
        assert!(data
            .error_message
            .unwrap()
            .contains("ProcessPaymentSentMessage (1/1)"));
    }

    #[tokio::test]
    async fn test_payout_seen_before_peer_message() {
        let seller = TradeParty::start(SomeTestTradeParams::seller_data()).await;
        let buyer = TradeParty::start(SomeTestTradeParams::buyer_data()).await;

        seller.trade.start().await.unwrap();
        seller.deliver_messages_to(&buyer).await.unwrap();
        fire(&buyer, TxListenerKind::Deposit, 1).await;
        buyer.trade.confirm_payment_started().await.unwrap();

        fire(&buyer, TxListenerKind::Payout, 0).await;
        assert_eq!(buyer.state().await, TradeState::PayoutSeenInNetwork);

        // The announcement arriving afterwards changes nothing
        buyer
            .trade
            .handle_peer_message(TradeMessage::PayoutTxPublished {
                payout_tx_id: SomeTestTradeParams::payout_tx_id(),
            })
            .await
            .unwrap();
        let data = buyer.trade.query_data().await.unwrap();
        assert_eq!(data.state, TradeState::PayoutSeenInNetwork);
        assert_eq!(data.payout_tx_id, Some(SomeTestTradeParams::payout_tx_id()));
    }

    #[tokio::test]
    async fn test_peer_message_for_wrong_role_is_rejected() {
        let seller = TradeParty::start(SomeTestTradeParams::seller_data()).await;

        let result = seller
            .trade
            .handle_peer_message(TradeMessage::DepositTxPublished {
                deposit_tx_id: SomeTestTradeParams::deposit_tx_id(),
            })
            .await;

        assert!(matches!(result, Err(EscrowError::Config(_))));
        assert_eq!(seller.state().await, TradeState::Preparation);
    }

    #[tokio::test]
    async fn test_failed_deposit_listener_registration() {
        let seller = TradeParty::start(SomeTestTradeParams::seller_data()).await;
        seller.doubles.tx_observer.set_fail_registration(true);

        let result = seller.trade.start().await;

        assert!(matches!(result, Err(EscrowError::PipelineFailed(_))));
        let data = seller.trade.query_data().await.unwrap();
        assert_eq!(data.state, TradeState::DepositPublished);
        assert!(data
            .error_message
            .unwrap()
            .contains("SetupDepositTxListener (4/4)"));
    }

    #[tokio::test]
    async fn test_restore_reregisters_listeners() {
        logger_setup();

        let base_dir = tempfile::tempdir().unwrap();
        let config = EscrowConfig {
            data_dir: base_dir.path().join("trades"),
            ..Default::default()
        };

        // First run: publish the deposit and go down
        {
            let doubles = TestDoubles::new();
            let manager = TradeManager::new(
                config.clone(),
                doubles.fee_provider.clone(),
                doubles.collaborators(),
            )
            .unwrap();
            let trade = manager
                .new_trade(SomeTestTradeParams::seller_data())
                .await
                .unwrap();
            trade.start().await.unwrap();
            assert_eq!(trade.query_state().await.unwrap(), TradeState::DepositPublished);

            manager.shutdown().await.unwrap();
        }

        // The manager wrote into the configured data directory
        let paths = Persister::trade_data_paths(&config.data_dir).unwrap();
        assert_eq!(paths.len(), 1);

        // Second run: the trade comes back and keeps listening
        let doubles = TestDoubles::new();
        let manager =
            TradeManager::new(config, doubles.fee_provider.clone(), doubles.collaborators())
                .unwrap();

        let restored = manager.initialize().await.unwrap();
        assert_eq!(restored, vec![SomeTestTradeParams::trade_id()]);

        let trade = manager.trade(SomeTestTradeParams::trade_id()).await.unwrap();
        let data = trade.query_data().await.unwrap();
        assert_eq!(data.state, TradeState::DepositPublished);
        assert_eq!(data.deposit_tx_id, Some(SomeTestTradeParams::deposit_tx_id()));
        assert_eq!(
            doubles.tx_observer.watched_deposit_tx_id(
                SomeTestTradeParams::trade_id(),
                TxListenerKind::Deposit
            ),
            Some(SomeTestTradeParams::deposit_tx_id())
        );

        assert!(
            doubles
                .tx_observer
                .fire(
                    SomeTestTradeParams::trade_id(),
                    TxListenerKind::Deposit,
                    SomeTestTradeParams::deposit_tx_id(),
                    1
                )
                .await
        );
        assert_eq!(trade.query_state().await.unwrap(), TradeState::DepositConfirmed);

        // Already running trades are not restored twice
        assert!(manager.restore_trades().await.unwrap().is_empty());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_manager_rejects_duplicate_trade() {
        let party = TradeParty::start(SomeTestTradeParams::seller_data()).await;

        let result = party
            .manager
            .new_trade(SomeTestTradeParams::seller_data())
            .await;
        assert!(matches!(result, Err(EscrowError::TradeExists(_))));

        let unknown = uuid::Uuid::new_v4();
        assert!(matches!(
            party.manager.trade(unknown).await,
            Err(EscrowError::TradeNotFound(_))
        ));
        assert_eq!(party.manager.trades().await.len(), 1);
    }
}
